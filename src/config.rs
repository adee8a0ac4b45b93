use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

/// Margin/leverage configuration.
#[derive(Debug, Clone)]
pub struct MarginConfig {
    /// Whether leveraged buys are allowed.
    pub enabled: bool,
    /// Maximum leverage multiple.
    pub max_leverage: u32,
    /// Daily interest rate applied to outstanding loan principal.
    /// Runtime-adjustable through the admin API; this is the boot value.
    pub daily_interest_rate: Decimal,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_leverage: 50,
            daily_interest_rate: dec!(0.0005),
        }
    }
}

/// Options engine configuration.
#[derive(Debug, Clone)]
pub struct OptionsConfig {
    /// Annual risk-free rate used by the pricing model.
    pub risk_free_rate: f64,
    /// Strike ladder half-width (strikes above and below ATM).
    pub chain_steps: u32,
    /// Premium floor; a quote never goes below this.
    pub min_premium: Decimal,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.03,
            chain_steps: 5,
            min_premium: dec!(0.01),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Starting (and bankruptcy-reset) cash balance per account.
    pub initial_balance: Decimal,
    /// Commission rate charged on trade amount.
    pub commission_rate: Decimal,
    /// Commission floor per trade.
    pub min_commission: Decimal,
    /// Allowed limit price band around the current price (fraction, e.g. 0.5).
    pub limit_price_band: Decimal,
    /// Whether order submission is gated on trading hours.
    pub trading_hours_enabled: bool,
    /// Seed mixed into per-day market data generation for reproducibility.
    pub market_seed: u64,
    /// Margin/leverage settings.
    pub margin: MarginConfig,
    /// Options engine settings.
    pub options: OptionsConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3001);

        Self {
            host,
            port,
            initial_balance: env::var("INITIAL_BALANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(dec!(100000.00)),
            commission_rate: env::var("COMMISSION_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(dec!(0.0005)),
            min_commission: env::var("MIN_COMMISSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(dec!(5.00)),
            limit_price_band: env::var("LIMIT_PRICE_BAND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(dec!(0.5)),
            trading_hours_enabled: env::var("TRADING_HOURS_ENABLED")
                .ok()
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            market_seed: env::var("MARKET_SEED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20240601),
            margin: MarginConfig {
                enabled: env::var("MARGIN_ENABLED")
                    .ok()
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true),
                max_leverage: env::var("MARGIN_MAX_LEVERAGE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(50),
                daily_interest_rate: env::var("MARGIN_DAILY_INTEREST_RATE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(dec!(0.0005)),
            },
            options: OptionsConfig {
                risk_free_rate: env::var("OPTIONS_RISK_FREE_RATE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.03),
                chain_steps: env::var("OPTIONS_CHAIN_STEPS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
                min_premium: env::var("OPTIONS_MIN_PREMIUM")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(dec!(0.01)),
            },
        }
    }

    /// Commission for a trade amount: `amount × rate`, floored at the minimum.
    pub fn commission(&self, amount: Decimal) -> Decimal {
        let commission = (amount * self.commission_rate).round_dp_with_strategy(
            2,
            rust_decimal::RoundingStrategy::MidpointAwayFromZero,
        );
        commission.max(self.min_commission)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            initial_balance: dec!(100000.00),
            commission_rate: dec!(0.0005),
            min_commission: dec!(5.00),
            limit_price_band: dec!(0.5),
            trading_hours_enabled: true,
            market_seed: 20240601,
            margin: MarginConfig::default(),
            options: OptionsConfig::default(),
        }
    }
}
