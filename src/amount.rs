use alloy::primitives::{
    U256,
    utils::{
        ParseUnits,
        format_units,
        parse_units,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};

/// Decimal places of every pool balance (Dai and pool tickets).
pub const DECIMALS: u8 = 18;

/// `10^18`, the fixed-point unit.
pub const ONE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// A non-negative token amount stored as an 18-decimal fixed-point integer.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(U256);

#[derive(Debug, thiserror::Error)]
#[error("Invalid amount `{input}`: {reason}")]
pub struct ParseAmountError {
    pub input: String,
    pub reason: String,
}

impl Amount {
    pub const ZERO: Amount = Amount(U256::ZERO);

    pub const fn from_raw(raw: U256) -> Self {
        Self(raw)
    }

    pub fn from_whole(units: u64) -> Self {
        Self(U256::from(units).saturating_mul(ONE))
    }

    pub const fn raw(self) -> U256 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl From<U256> for Amount {
    fn from(raw: U256) -> Self {
        Self(raw)
    }
}

impl From<Amount> for U256 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = format_units(self.0, DECIMALS).map_err(|_| fmt::Error)?;
        let trimmed = match full.split_once('.') {
            Some((whole, frac)) => {
                let frac = frac.trim_end_matches('0');
                if frac.is_empty() {
                    format!("{whole}.0")
                } else {
                    format!("{whole}.{frac}")
                }
            }
            None => full,
        };
        f.write_str(&trimmed)
    }
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let fail = |reason: &str| ParseAmountError {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        if input.is_empty() {
            return Err(fail("empty input"));
        }
        if input.starts_with('-') {
            return Err(fail("amounts cannot be negative"));
        }
        if let Some((_, frac)) = input.split_once('.') {
            if frac.len() > DECIMALS as usize {
                return Err(fail("more than 18 decimal places"));
            }
        }
        match parse_units(input, DECIMALS) {
            Ok(ParseUnits::U256(raw)) => Ok(Self(raw)),
            Ok(ParseUnits::I256(_)) => Err(fail("amounts cannot be negative")),
            Err(e) => Err(fail(&e.to_string())),
        }
    }
}

/// Renders an amount as US dollars, e.g. `$1,234.50`.
///
/// The fraction is rounded half-up to `max_digits` places and then trimmed of
/// trailing zeros, keeping at least `min_digits` places.
pub fn format_currency(amount: Amount, min_digits: usize, max_digits: usize) -> String {
    let max_digits = max_digits.min(DECIMALS as usize);
    let min_digits = min_digits.min(max_digits);
    let ten = U256::from(10u64);

    let scale = ten.pow(U256::from(DECIMALS as usize - max_digits));
    let mut scaled = amount.0 / scale;
    if (amount.0 % scale) * U256::from(2u64) >= scale && scale > U256::from(1u64) {
        scaled += U256::from(1u64);
    }

    let unit = ten.pow(U256::from(max_digits));
    let whole = (scaled / unit).to_string();
    let mut frac = format!("{:0>width$}", (scaled % unit).to_string(), width = max_digits);
    while frac.len() > min_digits && frac.ends_with('0') {
        frac.pop();
    }

    let grouped = group_thousands(&whole);
    if frac.is_empty() {
        format!("${grouped}")
    } else {
        format!("${grouped}.{frac}")
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
