use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use common::error::TIMESTAMP_OUTSIDE_RECV_WINDOW;
use common::{
    Balance, Candle, Error, ExchangeGateway, ExchangeOrder, MarketPrecision, OrderSide,
    OrderStatus, Result,
};

const BASE_URL: &str = "https://api.binance.com";
const RECV_WINDOW_MS: u64 = 5_000;

/// REST API client for Binance spot. Implements the exchange gateway for live trading.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: BASE_URL.to_string(),
            http,
        })
    }

    /// Point the client at another host, e.g. the spot testnet.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn sign(&self, query: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Config(format!("invalid Binance secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{}{path}?{params}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        read_body(resp).await
    }

    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = if params.is_empty() {
            format!("recvWindow={RECV_WINDOW_MS}&timestamp={ts}")
        } else {
            format!("{params}&recvWindow={RECV_WINDOW_MS}&timestamp={ts}")
        };
        let signature = self.sign(&query)?;
        let signed_query = format!("{query}&signature={signature}");

        let request = if method == Method::POST {
            self.http
                .post(format!("{}{path}", self.base_url))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(signed_query)
        } else {
            self.http
                .request(method, format!("{}{path}?{signed_query}", self.base_url))
        };

        let resp = request
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        read_body(resp).await
    }

    async fn place_limit_order(
        &self,
        pair: &str,
        side: OrderSide,
        amount: f64,
        price: f64,
    ) -> Result<String> {
        let params = format!(
            "symbol={pair}&side={}&type=LIMIT&timeInForce=GTC&quantity={amount}&price={price}",
            side.as_str()
        );
        debug!(pair, side = %side, amount, price, "Submitting limit order to Binance");
        let body = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let resp: NewOrderResponse = serde_json::from_str(&body)?;
        Ok(resp.order_id.to_string())
    }

    /// Fees paid on an order's fills, converted to quote currency.
    async fn order_fees(&self, id: &str, pair: &str) -> Result<f64> {
        let body = self
            .signed(Method::GET, "/api/v3/myTrades", &format!("symbol={pair}&orderId={id}"))
            .await?;
        let trades: Vec<TradeResponse> = serde_json::from_str(&body)?;
        Ok(trades.iter().map(|t| t.fee_in_quote(pair)).sum())
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body));
    }
    Ok(body)
}

/// Map a Binance error response to the gateway error taxonomy.
///
/// Clock-skew and nonce rejections become `InvalidNonce` carrying the
/// exchange code so the retry wrapper can tell the transient case apart.
pub(crate) fn api_error(status: u16, body: &str) -> Error {
    #[derive(Deserialize)]
    struct ApiError {
        code: i64,
        msg: String,
    }

    match serde_json::from_str::<ApiError>(body) {
        Ok(err) => {
            let lower = err.msg.to_ascii_lowercase();
            if err.code == TIMESTAMP_OUTSIDE_RECV_WINDOW
                || lower.contains("timestamp")
                || lower.contains("nonce")
            {
                Error::InvalidNonce { code: Some(err.code), message: err.msg }
            } else {
                Error::Exchange(format!("HTTP {status} code {}: {}", err.code, err.msg))
            }
        }
        Err(_) if body.to_ascii_lowercase().contains("nonce") => Error::InvalidNonce {
            code: None,
            message: body.to_string(),
        },
        Err(_) => Error::Exchange(format!("HTTP {status}: {body}")),
    }
}

pub(crate) fn order_status(status: &str) -> OrderStatus {
    match status {
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Cancelled,
        // NEW, PARTIALLY_FILLED, PENDING_NEW
        _ => OrderStatus::Pending,
    }
}

fn parse_f64(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| Error::Exchange(format!("bad {field} '{raw}': {e}")))
}

/// Klines arrive as positional arrays with numeric strings.
pub(crate) fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    rows.iter()
        .map(|row| {
            let num = |i: usize, field: &str| -> Result<f64> {
                match row.get(i) {
                    Some(Value::String(s)) => parse_f64(s, field),
                    Some(Value::Number(n)) => n
                        .as_f64()
                        .ok_or_else(|| Error::Exchange(format!("bad kline {field}"))),
                    _ => Err(Error::Exchange(format!("kline missing {field}"))),
                }
            };
            let open_ms = row
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::Exchange("kline missing open time".into()))?;
            let open_time = Utc
                .timestamp_millis_opt(open_ms)
                .single()
                .ok_or_else(|| Error::Exchange(format!("bad kline open time {open_ms}")))?;
            Ok(Candle {
                open_time,
                open: num(1, "open")?,
                high: num(2, "high")?,
                low: num(3, "low")?,
                close: num(4, "close")?,
                volume: num(5, "volume")?,
            })
        })
        .collect()
}

pub(crate) fn parse_precision(body: &str, pair: &str) -> Result<MarketPrecision> {
    let info: ExchangeInfo = serde_json::from_str(body)?;
    let symbol = info
        .symbols
        .into_iter()
        .find(|s| s.symbol == pair)
        .ok_or_else(|| Error::NotFound(format!("symbol {pair} not in exchangeInfo")))?;

    let mut precision = MarketPrecision::default();
    for filter in symbol.filters {
        match filter.filter_type.as_str() {
            "PRICE_FILTER" => {
                if let Some(tick) = filter.tick_size {
                    precision.price_decimals = MarketPrecision::decimals_from_step(&tick);
                }
            }
            "LOT_SIZE" => {
                if let Some(step) = filter.step_size {
                    precision.amount_decimals = MarketPrecision::decimals_from_step(&step);
                }
            }
            "NOTIONAL" | "MIN_NOTIONAL" => {
                if let Some(min) = filter.min_notional {
                    precision.min_notional = parse_f64(&min, "minNotional")?;
                }
            }
            _ => {}
        }
    }
    Ok(precision)
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn get_price(&self, pair: &str) -> Result<f64> {
        let body = self
            .public_get("/api/v3/ticker/price", &format!("symbol={pair}"))
            .await?;
        let ticker: PriceTicker = serde_json::from_str(&body)?;
        parse_f64(&ticker.price, "price")
    }

    async fn fetch_balance(&self, asset: &str) -> Result<Balance> {
        let body = self.signed(Method::GET, "/api/v3/account", "").await?;
        let account: AccountResponse = serde_json::from_str(&body)?;
        match account.balances.into_iter().find(|b| b.asset == asset) {
            Some(b) => Ok(Balance {
                free: parse_f64(&b.free, "free")?,
                locked: parse_f64(&b.locked, "locked")?,
            }),
            None => Ok(Balance::default()),
        }
    }

    async fn place_limit_buy_order(&self, pair: &str, amount: f64, price: f64) -> Result<String> {
        self.place_limit_order(pair, OrderSide::Buy, amount, price).await
    }

    async fn place_limit_sell_order(&self, pair: &str, amount: f64, price: f64) -> Result<String> {
        self.place_limit_order(pair, OrderSide::Sell, amount, price).await
    }

    async fn fetch_order(&self, id: &str, pair: &str) -> Result<ExchangeOrder> {
        let body = self
            .signed(Method::GET, "/api/v3/order", &format!("symbol={pair}&orderId={id}"))
            .await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;

        let amount = parse_f64(&resp.orig_qty, "origQty")?;
        let filled = parse_f64(&resp.executed_qty, "executedQty")?;
        let quote_filled = parse_f64(&resp.cummulative_quote_qty, "cummulativeQuoteQty")?;
        let average_price = (filled > 0.0).then(|| quote_filled / filled);
        let fee = if filled > 0.0 { self.order_fees(id, pair).await? } else { 0.0 };

        Ok(ExchangeOrder {
            id: resp.order_id.to_string(),
            pair: resp.symbol,
            side: OrderSide::parse(&resp.side)
                .ok_or_else(|| Error::Exchange(format!("unknown side '{}'", resp.side)))?,
            status: order_status(&resp.status),
            price: parse_f64(&resp.price, "price")?,
            average_price,
            amount,
            filled,
            fee,
        })
    }

    async fn cancel_order(&self, id: &str, pair: &str) -> Result<()> {
        self.signed(Method::DELETE, "/api/v3/order", &format!("symbol={pair}&orderId={id}"))
            .await?;
        Ok(())
    }

    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut params = format!("symbol={pair}&interval={timeframe}&limit={limit}");
        if let Some(since) = since {
            params.push_str(&format!("&startTime={}", since.timestamp_millis()));
        }
        let body = self.public_get("/api/v3/klines", &params).await?;
        parse_klines(&body)
    }

    async fn market_precision(&self, pair: &str) -> Result<MarketPrecision> {
        let body = self
            .public_get("/api/v3/exchangeInfo", &format!("symbol={pair}"))
            .await?;
        parse_precision(&body, pair)
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewOrderResponse {
    order_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    price: String,
    orig_qty: String,
    executed_qty: String,
    cummulative_quote_qty: String,
    status: String,
    side: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeResponse {
    price: String,
    commission: String,
    commission_asset: String,
}

impl TradeResponse {
    /// Commission in quote terms. Commission paid in a third asset (BNB) is
    /// not converted and counts as zero.
    fn fee_in_quote(&self, pair: &str) -> f64 {
        let commission = self.commission.parse::<f64>().unwrap_or(0.0);
        if pair.ends_with(&self.commission_asset) {
            commission
        } else if pair.starts_with(&self.commission_asset) {
            commission * self.price.parse::<f64>().unwrap_or(0.0)
        } else {
            0.0
        }
    }
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<AssetBalance>,
}

#[derive(Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<SymbolFilter>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    tick_size: Option<String>,
    step_size: Option<String>,
    min_notional: Option<String>,
}
