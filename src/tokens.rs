//! Token and chain configuration
//!
//! Input tokens live on the source EVM chain and arrive on Pendulum through SquidRouter.
//! Output tokens are Stellar anchor assets that exist on Pendulum as Spacewalk wrapped assets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three networks an offramp touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Polygon,
    Pendulum,
    Stellar,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Chain::Polygon => "polygon",
            Chain::Pendulum => "pendulum",
            Chain::Stellar => "stellar",
        };
        f.write_str(name)
    }
}

/// Chain-local asset identifier. `native` is the chain's fee token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    const NATIVE: &'static str = "native";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn native() -> Self {
        Self(Self::NATIVE.to_string())
    }

    pub fn is_native(&self) -> bool {
        self.0 == Self::NATIVE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decimals of the native fee token on each chain
pub fn native_decimals(chain: Chain) -> u32 {
    match chain {
        Chain::Polygon => 18,
        Chain::Pendulum => 12,
        Chain::Stellar => 7,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputTokenType {
    Usdc,
    Usdce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTokenType {
    Eurc,
    Ars,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTokenDetails {
    pub asset_symbol: &'static str,
    pub source_asset: &'static str,
    pub source_decimals: u32,
    pub pendulum_asset: &'static str,
    pub pendulum_decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTokenDetails {
    pub stellar_code: &'static str,
    pub stellar_issuer: &'static str,
    pub toml_url: &'static str,
    pub pendulum_asset: &'static str,
    pub pendulum_decimals: u32,
    pub stellar_decimals: u32,
    /// Smallest withdrawal the anchor accepts
    pub minimum_withdrawal_units: &'static str,
}

const USDC: InputTokenDetails = InputTokenDetails {
    asset_symbol: "USDC",
    source_asset: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
    source_decimals: 6,
    pendulum_asset: "XCM(12)",
    pendulum_decimals: 6,
};

const USDCE: InputTokenDetails = InputTokenDetails {
    asset_symbol: "USDC.e",
    source_asset: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174",
    source_decimals: 6,
    pendulum_asset: "XCM(2)",
    pendulum_decimals: 6,
};

const EURC: OutputTokenDetails = OutputTokenDetails {
    stellar_code: "EURC",
    stellar_issuer: "GDHU6WRG4IEQXM5NZ4BMPKOXHW76MZM4Y2IEMFDVXBSDP6FJY4ITNPP2",
    toml_url: "https://circle.anchor.mykobo.co/.well-known/stellar.toml",
    pendulum_asset: "Stellar(EURC:GDHU6WRG4IEQXM5NZ4BMPKOXHW76MZM4Y2IEMFDVXBSDP6FJY4ITNPP2)",
    pendulum_decimals: 12,
    stellar_decimals: 7,
    minimum_withdrawal_units: "10",
};

const ARS: OutputTokenDetails = OutputTokenDetails {
    stellar_code: "ARS",
    stellar_issuer: "GCYE7C77EB5AWAA25R5XMWNI2EDOKTTFTTPZKM2SR5DI4B4WFD52DARS",
    toml_url: "https://api.anclap.com/.well-known/stellar.toml",
    pendulum_asset: "Stellar(ARS:GCYE7C77EB5AWAA25R5XMWNI2EDOKTTFTTPZKM2SR5DI4B4WFD52DARS)",
    pendulum_decimals: 12,
    stellar_decimals: 7,
    minimum_withdrawal_units: "1000",
};

impl InputTokenType {
    pub const ALL: [InputTokenType; 2] = [InputTokenType::Usdc, InputTokenType::Usdce];

    pub fn details(&self) -> &'static InputTokenDetails {
        match self {
            InputTokenType::Usdc => &USDC,
            InputTokenType::Usdce => &USDCE,
        }
    }

    pub fn source_asset(&self) -> AssetId {
        AssetId::new(self.details().source_asset)
    }

    pub fn pendulum_asset(&self) -> AssetId {
        AssetId::new(self.details().pendulum_asset)
    }
}

impl OutputTokenType {
    pub const ALL: [OutputTokenType; 2] = [OutputTokenType::Eurc, OutputTokenType::Ars];

    pub fn details(&self) -> &'static OutputTokenDetails {
        match self {
            OutputTokenType::Eurc => &EURC,
            OutputTokenType::Ars => &ARS,
        }
    }

    pub fn pendulum_asset(&self) -> AssetId {
        AssetId::new(self.details().pendulum_asset)
    }

    pub fn stellar_asset(&self) -> AssetId {
        let details = self.details();
        AssetId::new(format!("{}:{}", details.stellar_code, details.stellar_issuer))
    }
}

impl FromStr for InputTokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usdc" => Ok(InputTokenType::Usdc),
            "usdce" | "usdc.e" => Ok(InputTokenType::Usdce),
            other => Err(format!("unknown input token: {other}")),
        }
    }
}

impl FromStr for OutputTokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eurc" => Ok(OutputTokenType::Eurc),
            "ars" => Ok(OutputTokenType::Ars),
            other => Err(format!("unknown output token: {other}")),
        }
    }
}

impl fmt::Display for InputTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.details().asset_symbol)
    }
}

impl fmt::Display for OutputTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.details().stellar_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parsing() {
        assert_eq!("USDC".parse::<InputTokenType>().unwrap(), InputTokenType::Usdc);
        assert_eq!("usdc.e".parse::<InputTokenType>().unwrap(), InputTokenType::Usdce);
        assert_eq!("eurc".parse::<OutputTokenType>().unwrap(), OutputTokenType::Eurc);
        assert!("btc".parse::<OutputTokenType>().is_err());
    }

    #[test]
    fn test_stellar_asset_is_code_and_issuer() {
        let asset = OutputTokenType::Eurc.stellar_asset();
        assert!(asset.as_str().starts_with("EURC:G"));
        assert!(!asset.is_native());
        assert!(AssetId::native().is_native());
    }

    #[test]
    fn test_serde_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&InputTokenType::Usdce).unwrap(), "\"usdce\"");
        assert_eq!(serde_json::to_string(&Chain::Stellar).unwrap(), "\"stellar\"");
    }
}
