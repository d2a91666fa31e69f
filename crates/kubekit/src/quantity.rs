//! Kubernetes resource quantities.
//!
//! Parses the quantity grammar used for cpu, memory and storage requests
//! into canonical integers: millicores for cpu, bytes for memory.

use std::sync::LazyLock;

use regex::Regex;

static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<num>[0-9]+(?:\.[0-9]+)?|\.[0-9]+)(?P<suffix>[KMGTPE]i|[mkMGTPE]|[eE][+-]?[0-9]+)?$")
        .expect("quantity regex is valid")
});

/// A parsed quantity: a decimal number plus its suffix
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    value: f64,
    suffix: Option<String>,
}

impl Quantity {
    /// Parse a quantity string such as `500m`, `1Gi` or `1e3`.
    ///
    /// Returns `None` when the string does not match the grammar.
    pub fn parse(input: &str) -> Option<Self> {
        let caps = QUANTITY_RE.captures(input)?;
        let value: f64 = caps.name("num")?.as_str().parse().ok()?;
        Some(Self {
            value,
            suffix: caps.name("suffix").map(|m| m.as_str().to_string()),
        })
    }

    /// Multiplier applied to the number, in base units
    fn multiplier(&self) -> f64 {
        let Some(suffix) = self.suffix.as_deref() else {
            return 1.0;
        };
        match suffix {
            "m" => 1e-3,
            "k" => 1e3,
            "M" => 1e6,
            "G" => 1e9,
            "T" => 1e12,
            "P" => 1e15,
            "E" => 1e18,
            "Ki" => 1024.0,
            "Mi" => 1024.0_f64.powi(2),
            "Gi" => 1024.0_f64.powi(3),
            "Ti" => 1024.0_f64.powi(4),
            "Pi" => 1024.0_f64.powi(5),
            "Ei" => 1024.0_f64.powi(6),
            exponent => exponent[1..]
                .parse::<i32>()
                .map_or(1.0, |e| 10.0_f64.powi(e)),
        }
    }

    /// Value in base units (cores or bytes)
    pub fn as_f64(&self) -> f64 {
        self.value * self.multiplier()
    }

    /// Value in millicores
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn millicores(&self) -> u64 {
        (self.as_f64() * 1000.0).round() as u64
    }

    /// Value in bytes
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn bytes(&self) -> u64 {
        self.as_f64().round() as u64
    }
}

/// Parse a cpu quantity into millicores
pub fn parse_cpu(input: &str) -> Option<u64> {
    Quantity::parse(input).map(|q| q.millicores())
}

/// Parse a memory or storage quantity into bytes.
///
/// The milli suffix is not meaningful for bytes and is rejected.
pub fn parse_bytes(input: &str) -> Option<u64> {
    let quantity = Quantity::parse(input)?;
    if quantity.suffix.as_deref() == Some("m") {
        return None;
    }
    Some(quantity.bytes())
}
