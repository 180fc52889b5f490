use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::models::{cell, ColumnMap, OrderRecord};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const ORDERS_RANGE: &str = "Orders!A1:K";
const ORDERS_APPEND_RANGE: &str = "Orders!A1:K1";
const ANALYTICS_RANGE: &str = "Analytics!A2:B";

/// Tabular order store. Updates are keyed by order id, never by a
/// previously scanned row position.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn append_order(&self, order: &OrderRecord) -> Result<(), AppError>;
    async fn list_orders(&self) -> Result<Vec<OrderRecord>, AppError>;
    /// Flip the row's notified flag to "true", resolving the row's current
    /// position at write time.
    async fn mark_notified(&self, order_id: &str) -> Result<(), AppError>;
}

/// One per-day view counter row in the analytics tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewCount {
    pub date: String,
    pub count: u32,
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn view_counts(&self) -> Result<Vec<ViewCount>, AppError>;
    async fn set_count(&self, date: &str, count: u32) -> Result<(), AppError>;
    async fn append_count(&self, date: &str, count: u32) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub service_account_email: String,
    /// PEM-encoded RSA private key, newlines already normalized.
    pub private_key_pem: String,
}

#[derive(Debug, Serialize)]
struct TokenClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ValueRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<String>,
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Google Sheets values-API client authenticated with a service account:
/// a signed JWT assertion is exchanged for a bearer token, cached until
/// shortly before expiry.
pub struct SheetsClient {
    http: reqwest::Client,
    config: SheetsConfig,
    signing_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Result<Self, AppError> {
        if config.spreadsheet_id.is_empty() {
            return Err(AppError::Config("spreadsheet id is not set".to_string()));
        }
        let signing_key = EncodingKey::from_rsa_pem(config.private_key_pem.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid service account key: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            config,
            signing_key,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now();
        let claims = TokenClaims {
            iss: &self.config.service_account_email,
            scope: SCOPE,
            aud: TOKEN_URI,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| AppError::Store(format!("failed to sign token assertion: {e}")))?;

        let response: TokenResponse = self
            .http
            .post(TOKEN_URI)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Store(format!("token request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Store(format!("token request rejected: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Store(format!("malformed token response: {e}")))?;

        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            // Refresh a minute early so an in-flight call never carries an
            // expired token.
            expires_at: now + Duration::seconds(response.expires_in - 60),
        });
        Ok(response.access_token)
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "{SHEETS_BASE_URL}/{}/values/{}{suffix}",
            self.config.spreadsheet_id,
            utf8_percent_encode(range, NON_ALPHANUMERIC),
        )
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, AppError> {
        let token = self.access_token().await?;
        let body: ValueRange = self
            .http
            .get(self.values_url(range, ""))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Store(format!("read {range} failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Store(format!("read {range} rejected: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Store(format!("malformed response for {range}: {e}")))?;
        Ok(body.values)
    }

    async fn append_values(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), AppError> {
        let token = self.access_token().await?;
        self.http
            .post(self.values_url(range, ":append?valueInputOption=USER_ENTERED"))
            .bearer_auth(token)
            .json(&ValueRange { range: None, values })
            .send()
            .await
            .map_err(|e| AppError::Store(format!("append to {range} failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Store(format!("append to {range} rejected: {e}")))?;
        Ok(())
    }

    async fn update_values(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), AppError> {
        let token = self.access_token().await?;
        self.http
            .put(self.values_url(range, "?valueInputOption=RAW"))
            .bearer_auth(token)
            .json(&ValueRange { range: None, values })
            .send()
            .await
            .map_err(|e| AppError::Store(format!("update of {range} failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Store(format!("update of {range} rejected: {e}")))?;
        Ok(())
    }
}

/// 0-based column index to the A1-notation column letter(s).
fn column_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[async_trait]
impl OrderStore for SheetsClient {
    async fn append_order(&self, order: &OrderRecord) -> Result<(), AppError> {
        self.append_values(ORDERS_APPEND_RANGE, vec![order.to_row()]).await
    }

    async fn list_orders(&self) -> Result<Vec<OrderRecord>, AppError> {
        let rows = self.get_values(ORDERS_RANGE).await?;
        let Some((headers, data)) = rows.split_first() else {
            return Ok(Vec::new());
        };
        let map = ColumnMap::from_headers(headers)?;
        Ok(data
            .iter()
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .map(|row| OrderRecord::from_row(row, &map))
            .collect())
    }

    async fn mark_notified(&self, order_id: &str) -> Result<(), AppError> {
        let rows = self.get_values(ORDERS_RANGE).await?;
        let Some((headers, data)) = rows.split_first() else {
            return Err(AppError::Store("orders sheet is empty".to_string()));
        };
        let map = ColumnMap::from_headers(headers)?;
        let position = data
            .iter()
            .position(|row| cell(row, map.order_id) == order_id)
            .ok_or_else(|| AppError::Store(format!("order {order_id} no longer present in sheet")))?;

        // Header row is sheet row 1, data starts at row 2.
        let range = format!("Orders!{}{}", column_letter(map.notified_flag), position + 2);
        self.update_values(&range, vec![vec!["true".to_string()]]).await
    }
}

#[async_trait]
impl AnalyticsStore for SheetsClient {
    async fn view_counts(&self) -> Result<Vec<ViewCount>, AppError> {
        let rows = self.get_values(ANALYTICS_RANGE).await?;
        Ok(rows
            .iter()
            .map(|row| ViewCount {
                date: cell(row, 0).to_string(),
                count: cell(row, 1).parse().unwrap_or(0),
            })
            .collect())
    }

    async fn set_count(&self, date: &str, count: u32) -> Result<(), AppError> {
        let rows = self.get_values(ANALYTICS_RANGE).await?;
        let position = rows
            .iter()
            .position(|row| cell(row, 0) == date)
            .ok_or_else(|| AppError::Store(format!("no analytics row for {date}")))?;
        let range = format!("Analytics!B{}", position + 2);
        self.update_values(&range, vec![vec![count.to_string()]]).await
    }

    async fn append_count(&self, date: &str, count: u32) -> Result<(), AppError> {
        self.append_values(ANALYTICS_RANGE, vec![vec![date.to_string(), count.to_string()]])
            .await
    }
}

pub fn existing_order_ids(orders: &[OrderRecord]) -> HashSet<String> {
    orders
        .iter()
        .map(|o| o.order_id.clone())
        .filter(|id| !id.is_empty())
        .collect()
}
