use serde::Serialize;

use crate::models::{DEFAULT_UNIT, NewShoppingItem};

/// Canonical culinary fractions preferred by [`format`].
const CULINARY_FRACTIONS: &[(f64, &str)] = &[
    (0.125, "1/8"),
    (0.25, "1/4"),
    (1.0 / 3.0, "1/3"),
    (0.5, "1/2"),
    (2.0 / 3.0, "2/3"),
    (0.75, "3/4"),
];

const FRACTION_TOLERANCE: f64 = 0.01;

const VULGAR_FRACTIONS: &[(char, f64)] = &[
    ('½', 0.5),
    ('¼', 0.25),
    ('¾', 0.75),
    ('⅓', 1.0 / 3.0),
    ('⅔', 2.0 / 3.0),
    ('⅛', 0.125),
];

/// Recognized unit spellings and the token they canonicalize to.
const UNIT_TOKENS: &[(&str, &str)] = &[
    ("g", "g"),
    ("gr", "g"),
    ("gram", "g"),
    ("grams", "g"),
    ("kg", "kg"),
    ("kilo", "kg"),
    ("kilos", "kg"),
    ("kilogram", "kg"),
    ("kilograms", "kg"),
    ("mg", "mg"),
    ("ml", "ml"),
    ("milliliter", "ml"),
    ("milliliters", "ml"),
    ("millilitre", "ml"),
    ("millilitres", "ml"),
    ("cl", "cl"),
    ("dl", "dl"),
    ("l", "l"),
    ("liter", "l"),
    ("liters", "l"),
    ("litre", "l"),
    ("litres", "l"),
    ("tsp", "tsp"),
    ("teaspoon", "tsp"),
    ("teaspoons", "tsp"),
    ("tbsp", "tbsp"),
    ("tablespoon", "tbsp"),
    ("tablespoons", "tbsp"),
    ("c", "cup"),
    ("cup", "cup"),
    ("cups", "cup"),
    ("oz", "oz"),
    ("ounce", "oz"),
    ("ounces", "oz"),
    ("lb", "lb"),
    ("lbs", "lb"),
    ("pound", "lb"),
    ("pounds", "lb"),
    ("piece", "piece"),
    ("pieces", "piece"),
    ("pc", "piece"),
    ("pcs", "piece"),
    ("can", "can"),
    ("cans", "can"),
    ("jar", "jar"),
    ("jars", "jar"),
    ("bottle", "bottle"),
    ("bottles", "bottle"),
    ("pack", "pack"),
    ("packs", "pack"),
    ("package", "pack"),
    ("packages", "pack"),
    ("bag", "bag"),
    ("bags", "bag"),
    ("box", "box"),
    ("boxes", "box"),
    ("bunch", "bunch"),
    ("bunches", "bunch"),
    ("clove", "clove"),
    ("cloves", "clove"),
    ("slice", "slice"),
    ("slices", "slice"),
    ("pinch", "pinch"),
    ("pinches", "pinch"),
    ("head", "head"),
    ("heads", "head"),
    ("stick", "stick"),
    ("sticks", "stick"),
    ("loaf", "loaf"),
    ("loaves", "loaf"),
    ("dozen", "dozen"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedQuantity {
    Number(f64),
    Range(f64, f64),
    Text(String),
}

impl ParsedQuantity {
    /// Numeric value used for stock comparisons: the lower bound of a range,
    /// `None` for free text.
    #[must_use]
    pub fn amount(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Range(lo, _) => Some(*lo),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        match self {
            Self::Number(n) => Self::Number(scale(*n, factor)),
            Self::Range(lo, hi) => Self::Range(scale(*lo, factor), scale(*hi, factor)),
            Self::Text(t) => Self::Text(t.clone()),
        }
    }

    #[must_use]
    pub fn format(&self) -> String {
        match self {
            Self::Number(n) => format(*n),
            Self::Range(lo, hi) => format!("{}-{}", format(*lo), format(*hi)),
            Self::Text(t) => t.clone(),
        }
    }
}

/// Parse a free-text quantity as the author typed it: `"2"`, `"1,5"`,
/// `"1/2"`, `"1 1/2"`, `"½"`, `"2-3"` or `"to taste"`. Never fails: non-numeric
/// input comes back as [`ParsedQuantity::Text`].
#[must_use]
pub fn parse(text: &str) -> ParsedQuantity {
    let trimmed = text.trim();
    if let Some(n) = parse_number(trimmed) {
        return ParsedQuantity::Number(n);
    }
    if let Some((lo, hi)) = split_range(trimmed) {
        if let (Some(lo), Some(hi)) = (parse_number(lo), parse_number(hi)) {
            return ParsedQuantity::Range(lo, hi);
        }
    }
    ParsedQuantity::Text(trimmed.to_string())
}

#[must_use]
pub fn scale(value: f64, factor: f64) -> f64 {
    value * factor
}

/// Render a quantity the way a cook would write it.
///
/// Values within 0.01 of 1/8, 1/4, 1/3, 1/2, 2/3 or 3/4 print as that
/// fraction. Otherwise: below 1 two decimals, below 10 one decimal, else a
/// whole number, trailing zeros trimmed.
#[must_use]
pub fn format(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    for (target, label) in CULINARY_FRACTIONS {
        if (value - target).abs() <= FRACTION_TOLERANCE {
            return (*label).to_string();
        }
    }
    if value < 1.0 {
        trim_decimals(&format!("{value:.2}"))
    } else if value < 10.0 {
        trim_decimals(&format!("{value:.1}"))
    } else {
        format!("{:.0}", value.round())
    }
}

/// Scale a recipe quantity string by `factor`. Text that is not a number,
/// and any input at factor 1, is returned unchanged.
#[must_use]
pub fn scale_ingredient_quantity(text: &str, factor: f64) -> String {
    if (factor - 1.0).abs() < f64::EPSILON {
        return text.to_string();
    }
    match parse(text) {
        ParsedQuantity::Text(_) => text.to_string(),
        parsed => parsed.scaled(factor).format(),
    }
}

/// Canonical unit token for a spelling from the fixed vocabulary.
#[must_use]
pub fn canonical_unit(token: &str) -> Option<&'static str> {
    let lower = token.trim().trim_end_matches('.').to_lowercase();
    UNIT_TOKENS
        .iter()
        .find(|(spelling, _)| *spelling == lower)
        .map(|(_, canonical)| *canonical)
}

/// Normalize a user-supplied unit: vocabulary spellings collapse to their
/// canonical token, anything else is lower-cased, blank becomes `piece`.
#[must_use]
pub fn normalize_unit(unit: &str) -> String {
    let trimmed = unit.trim();
    if trimmed.is_empty() {
        return DEFAULT_UNIT.to_string();
    }
    canonical_unit(trimmed).map_or_else(|| trimmed.to_lowercase(), str::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreeformItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
}

impl From<FreeformItem> for NewShoppingItem {
    fn from(item: FreeformItem) -> Self {
        NewShoppingItem {
            name: item.name,
            quantity: item.quantity,
            unit: item.unit,
            category: None,
            recipe_id: None,
        }
    }
}

/// Parse a shopping line such as `"2 kg flour"`, `"500g butter"`,
/// `"milk 1 l"` or `"bananas"`.
///
/// Tries "quantity [unit] name", then "name quantity [unit]". Anything else
/// becomes one `piece` of the whole line.
#[must_use]
pub fn parse_freeform_item(line: &str) -> FreeformItem {
    let line = line.trim();
    let tokens: Vec<&str> = line.split_whitespace().collect();

    if let Some(item) = leading_quantity(&tokens) {
        return item;
    }
    if let Some(item) = trailing_quantity(&tokens) {
        return item;
    }

    FreeformItem {
        name: tokens.join(" "),
        quantity: 1.0,
        unit: DEFAULT_UNIT.to_string(),
    }
}

/// Split a pasted block into items: one per non-blank line, list bullets and
/// checkbox markers stripped.
#[must_use]
pub fn parse_pasted_list(text: &str) -> Vec<FreeformItem> {
    text.lines()
        .map(strip_bullet)
        .filter(|l| !l.is_empty())
        .map(parse_freeform_item)
        .filter(|item| !item.name.is_empty())
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    let mut rest = line.trim();
    for prefix in ["- ", "* ", "• ", "[ ] ", "[x] ", "[X] "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped.trim_start();
        }
    }
    // Numbered lists: "1. milk", "2) eggs"
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let after = &rest[digits..];
        for marker in [". ", ") "] {
            if let Some(stripped) = after.strip_prefix(marker) {
                return stripped.trim_start();
            }
        }
    }
    rest
}

fn leading_quantity(tokens: &[&str]) -> Option<FreeformItem> {
    let first = tokens.first()?;
    let (mut quantity, mut unit, mut consumed) = if let Some(q) = token_amount(first) {
        (q, None, 1)
    } else {
        let (q, u) = split_glued(first)?;
        (q, Some(u), 1)
    };

    // Mixed number: "1 1/2 cups sugar"
    if unit.is_none() {
        if let Some(next) = tokens.get(consumed) {
            if next.contains('/') && quantity.fract() == 0.0 {
                if let Some(frac) = parse_number(next) {
                    quantity += frac;
                    consumed += 1;
                }
            }
        }
    }

    if unit.is_none() {
        if let Some(u) = tokens.get(consumed).and_then(|t| canonical_unit(t)) {
            unit = Some(u);
            consumed += 1;
        }
    }

    let mut rest = &tokens[consumed..];
    if rest.first().is_some_and(|t| t.eq_ignore_ascii_case("of")) {
        rest = &rest[1..];
    }
    let name = rest.join(" ");
    if name.is_empty() {
        return None;
    }
    Some(FreeformItem {
        name,
        quantity,
        unit: unit.unwrap_or(DEFAULT_UNIT).to_string(),
    })
}

fn trailing_quantity(tokens: &[&str]) -> Option<FreeformItem> {
    let n = tokens.len();
    if n < 2 {
        return None;
    }
    let last = tokens[n - 1];

    let (quantity, unit, name_len) = if let Some(u) = canonical_unit(last) {
        let q = token_amount(tokens[n - 2])?;
        (q, u, n - 2)
    } else if let Some(q) = token_amount(last) {
        (q, DEFAULT_UNIT, n - 1)
    } else {
        let (q, u) = split_glued(last)?;
        (q, u, n - 1)
    };

    if name_len == 0 {
        return None;
    }
    Some(FreeformItem {
        name: tokens[..name_len].join(" "),
        quantity,
        unit: unit.to_string(),
    })
}

/// A positive amount from a single token (number, fraction or range).
fn token_amount(token: &str) -> Option<f64> {
    parse(token).amount().filter(|q| *q > 0.0)
}

/// Split a number glued to a unit, e.g. `"500g"` or `"1.5l"`.
fn split_glued(token: &str) -> Option<(f64, &'static str)> {
    let idx = token.find(|c: char| c.is_alphabetic())?;
    if idx == 0 {
        return None;
    }
    let (num_part, unit_part) = token.split_at(idx);
    let quantity = parse_number(num_part).filter(|q| *q > 0.0)?;
    let unit = canonical_unit(unit_part)?;
    Some((quantity, unit))
}

fn split_range(s: &str) -> Option<(&str, &str)> {
    if let Some((lo, hi)) = s.split_once(" to ") {
        return Some((lo, hi));
    }
    let (idx, sep) = s
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '-' || *c == '–')?;
    Some((&s[..idx], &s[idx + sep.len_utf8()..]))
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(last) = s.chars().last() {
        if let Some((_, frac)) = VULGAR_FRACTIONS.iter().find(|(c, _)| *c == last) {
            let whole = s[..s.len() - last.len_utf8()].trim();
            if whole.is_empty() {
                return Some(*frac);
            }
            return parse_decimal(whole).map(|w| w + frac);
        }
    }

    let parts: Vec<&str> = s.split_whitespace().collect();
    match parts.as_slice() {
        [single] => parse_fraction(single).or_else(|| parse_decimal(single)),
        [whole, frac] if frac.contains('/') => {
            let whole = parse_decimal(whole)?;
            if whole.fract() != 0.0 {
                return None;
            }
            parse_fraction(frac).map(|f| whole + f)
        }
        _ => None,
    }
}

fn parse_fraction(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num = parse_decimal(num)?;
    let den = parse_decimal(den)?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_decimal(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty()
        || !s.chars().any(|c| c.is_ascii_digit())
        || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }
    s.replace(',', ".").parse::<f64>().ok()
}

fn trim_decimals(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}
