use regex::Regex;

/// Mass/volume units understood in product weight labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MassUnit {
    Kilogram,
    Pound,
    Ounce,
    Millilitre,
    Gram,
}

impl MassUnit {
    /// Detection order. Multi-letter tokens come first so "kg" is never read as "g".
    pub const PRIORITY: [MassUnit; 5] = [
        MassUnit::Kilogram,
        MassUnit::Pound,
        MassUnit::Ounce,
        MassUnit::Millilitre,
        MassUnit::Gram,
    ];

    pub fn token(self) -> &'static str {
        match self {
            MassUnit::Kilogram => "kg",
            MassUnit::Pound => "lb",
            MassUnit::Ounce => "oz",
            MassUnit::Millilitre => "ml",
            MassUnit::Gram => "g",
        }
    }

    pub fn to_kilograms(self, amount: f64) -> f64 {
        match self {
            MassUnit::Kilogram => amount,
            MassUnit::Pound => amount * 0.453592,
            MassUnit::Ounce => amount * 0.0283495,
            // 1 ml is taken as 1 g
            MassUnit::Millilitre | MassUnit::Gram => amount / 1000.0,
        }
    }

    pub fn detect(label: &str) -> Option<MassUnit> {
        MassUnit::PRIORITY
            .into_iter()
            .find(|unit| label.contains(unit.token()))
    }
}

/// Converts free-text weight labels ("250g", "12 x 100g", "1lb") into kilograms.
pub struct UnitConverter {
    noise: Regex,
    quantity: Regex,
    multipack: Regex,
}

impl UnitConverter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(UnitConverter {
            // Everything except digits, the decimal point and unit letters is noise
            noise: Regex::new(r"[^0-9.kglbozm]")?,
            quantity: Regex::new(r"^(\d+(?:\.\d+)?|\.\d+)([a-z]*)\.?$")?,
            multipack: Regex::new(r"^(\d+)\s*x\s*(\d+(?:\.\d+)?)\s*([a-z]+)$")?,
        })
    }

    /// Returns `None` when the label carries no usable quantity.
    pub fn convert(&self, raw: &str) -> Option<f64> {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }

        if let Some(kilograms) = self.convert_multipack(&lowered) {
            return Some(kilograms);
        }

        let cleaned = self.noise.replace_all(&lowered, "");
        let captures = self.quantity.captures(&cleaned)?;
        let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
        let unit_label = captures.get(2).map(|m| m.as_str()).unwrap_or("");

        if unit_label.is_empty() {
            // A bare number is already in kilograms
            return Some(amount);
        }
        MassUnit::detect(unit_label).map(|unit| unit.to_kilograms(amount))
    }

    fn convert_multipack(&self, lowered: &str) -> Option<f64> {
        let captures = self.multipack.captures(lowered)?;
        let count: f64 = captures.get(1)?.as_str().parse().ok()?;
        let each: f64 = captures.get(2)?.as_str().parse().ok()?;
        let unit = MassUnit::detect(captures.get(3)?.as_str())?;
        Some(unit.to_kilograms(count * each))
    }
}
