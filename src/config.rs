//! Dashboard settings stored in the `app_config` table.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::{repository, Database};

pub const LTV_BASE_PRICE: &str = "ltv_base_price";
pub const LTV_PREMIUM_PRICE: &str = "ltv_premium_price";
pub const LTV_PREMIUM_SHARE: &str = "ltv_premium_share";
pub const CHANGE_LOOKBACK_DAYS: &str = "change_lookback_days";

/// Keys understood by [`Config`].
pub const KEYS: &[&str] = &[
    LTV_BASE_PRICE,
    LTV_PREMIUM_PRICE,
    LTV_PREMIUM_SHARE,
    CHANGE_LOOKBACK_DAYS,
];

/// Monthly price used to turn retention into lifetime value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LtvPricing {
    pub base_price: f64,
    /// Price of the premium plan, if any customers pay it.
    pub premium_price: Option<f64>,
    /// Fraction of customers on the premium plan.
    pub premium_share: f64,
}

impl Default for LtvPricing {
    fn default() -> Self {
        Self {
            base_price: 29.0,
            premium_price: None,
            premium_share: 0.0,
        }
    }
}

impl LtvPricing {
    /// Blended price per retained customer-month.
    pub fn unit_value(&self) -> f64 {
        match self.premium_price {
            Some(premium) => {
                self.base_price * (1.0 - self.premium_share) + premium * self.premium_share
            }
            None => self.base_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub ltv: LtvPricing,
    /// Days between the default start and end of a change breakdown.
    pub change_lookback_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ltv: LtvPricing::default(),
            change_lookback_days: 30,
        }
    }
}

impl Config {
    /// Read the settings from the database, falling back to defaults for
    /// keys that were never set.
    pub async fn load(db: &Database) -> Result<Self> {
        let entries = db.reader().call(|conn| repository::list_config(conn)).await?;
        Self::from_entries(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in entries {
            match key {
                LTV_BASE_PRICE => config.ltv.base_price = parse_price(key, value)?,
                LTV_PREMIUM_PRICE => config.ltv.premium_price = Some(parse_price(key, value)?),
                LTV_PREMIUM_SHARE => config.ltv.premium_share = parse_share(key, value)?,
                CHANGE_LOOKBACK_DAYS => config.change_lookback_days = parse_days(key, value)?,
                _ => log::debug!("ignoring config key {key}"),
            }
        }
        Ok(config)
    }
}

/// Check a value before it is stored under `key`. Keys this module does not
/// know are accepted unchanged.
pub fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        LTV_BASE_PRICE | LTV_PREMIUM_PRICE => parse_price(key, value).map(|_| ()),
        LTV_PREMIUM_SHARE => parse_share(key, value).map(|_| ()),
        CHANGE_LOOKBACK_DAYS => parse_days(key, value).map(|_| ()),
        _ => Ok(()),
    }
}

fn parse_price(key: &str, value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(price) if price.is_finite() && price >= 0.0 => Ok(price),
        _ => Err(Error::Config(format!("{key}: `{value}` is not a price"))),
    }
}

fn parse_share(key: &str, value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(share) if (0.0..=1.0).contains(&share) => Ok(share),
        _ => Err(Error::Config(format!(
            "{key}: `{value}` is not a fraction between 0 and 1"
        ))),
    }
}

fn parse_days(key: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(days) if days > 0 => Ok(days),
        _ => Err(Error::Config(format!(
            "{key}: `{value}` is not a positive number of days"
        ))),
    }
}
