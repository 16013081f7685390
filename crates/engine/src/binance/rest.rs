use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use common::{
    BrokerClient, Candle, CandleInterval, Error, Fill, Order, Result, TradingSchedule,
};

const BASE_URL: &str = "https://api.binance.com";
const EXCHANGE: &str = "BINANCE";
/// Max klines Binance returns per request.
const KLINES_LIMIT: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST API client for Binance spot.
///
/// Market data endpoints are public; only order placement needs credentials.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            http,
        })
    }

    fn sign(&self, query: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Config(format!("invalid Binance secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<String> {
        let url = if query.is_empty() {
            format!("{BASE_URL}{path}")
        } else {
            format!("{BASE_URL}{path}?{query}")
        };
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(Error::Config("Binance API key is not configured".into()));
        }
        let ts = Utc::now().timestamp_millis();
        let query = format!("{params}&timestamp={ts}");
        let signature = self.sign(&query)?;
        let body = format!("{query}&signature={signature}");
        let url = format!("{BASE_URL}{path}");

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

#[async_trait]
impl BrokerClient for BinanceClient {
    async fn candles(
        &self,
        figi: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut start_ms = from.timestamp_millis();
        let end_ms = to.timestamp_millis();

        // Page forward until the window is covered
        while start_ms <= end_ms {
            let query = format!(
                "symbol={figi}&interval={interval}&startTime={start_ms}&endTime={end_ms}&limit={KLINES_LIMIT}"
            );
            let body = self.public_get("/api/v3/klines", &query).await?;
            let page = parse_klines(&body, Utc::now())?;
            let page_len = page.len();

            match page.last() {
                Some(last) => start_ms = last.close_time.timestamp_millis() + 1,
                None => break,
            }
            candles.extend(page);
            if page_len < KLINES_LIMIT {
                break;
            }
        }

        debug!(figi = %figi, interval = %interval, candles = candles.len(), "Fetched klines");
        Ok(candles)
    }

    async fn can_trade_now(&self, exchange: &str) -> Result<(bool, TradingSchedule)> {
        if !exchange.eq_ignore_ascii_case(EXCHANGE) {
            return Err(Error::Exchange(format!(
                "BinanceClient has no schedule for exchange '{exchange}'"
            )));
        }

        let body = self.public_get("/sapi/v1/system/status", "").await?;
        let status: SystemStatus = serde_json::from_str(&body)?;
        debug!(status = status.status, msg = %status.msg, "Binance system status");

        // Spot trades around the clock; only maintenance closes it.
        let open = status.status == 0;
        Ok((open, TradingSchedule::around_the_clock(exchange, open)))
    }

    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let side = order.side.to_string();
        let order_type = if order.price.is_some() {
            "LIMIT"
        } else {
            "MARKET"
        };

        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}&newClientOrderId={}&newOrderRespType=FULL",
            order.figi, side, order_type, order.quantity, order.id
        );
        if let Some(price) = order.price {
            params.push_str(&format!("&price={}&timeInForce=GTC", price));
        }

        debug!(figi = %order.figi, side = %side, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;

        let resp: OrderResponse =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;

        let fill_price = resp
            .average_price()
            .unwrap_or_else(|| order.price.unwrap_or(0.0));

        Ok(Fill {
            order_id: resp.client_order_id,
            figi: order.figi.clone(),
            side: order.side,
            fill_price,
            quantity: order.quantity,
            timestamp: Utc::now(),
        })
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    client_order_id: String,
    #[serde(default)]
    fills: Vec<FillDetail>,
}

impl OrderResponse {
    /// Quantity-weighted price across partial fills.
    fn average_price(&self) -> Option<f64> {
        let (notional, qty) = self
            .fills
            .iter()
            .filter_map(|f| Some((f.price.parse::<f64>().ok()?, f.qty.parse::<f64>().ok()?)))
            .fold((0.0, 0.0), |(n, q), (p, x)| (n + p * x, q + x));
        (qty > 0.0).then(|| notional / qty)
    }
}

#[derive(Deserialize)]
struct FillDetail {
    price: String,
    qty: String,
}

#[derive(Deserialize)]
struct SystemStatus {
    status: u8,
    #[serde(default)]
    msg: String,
}

// ─── Kline parsing ───────────────────────────────────────────────────────────

/// Binance klines are positional arrays:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
fn parse_klines(body: &str, now: DateTime<Utc>) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    rows.iter().map(|row| parse_kline(row, now)).collect()
}

fn parse_kline(row: &[Value], now: DateTime<Utc>) -> Result<Candle> {
    let time = |i: usize| {
        row.get(i)
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| Error::Exchange(format!("kline field {i} is not a timestamp")))
    };
    let num = |i: usize| {
        row.get(i)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| Error::Exchange(format!("kline field {i} is not a decimal")))
    };

    let close_time = time(6)?;
    Ok(Candle {
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
        open_time: time(0)?,
        close_time,
        is_closed: close_time < now,
    })
}
