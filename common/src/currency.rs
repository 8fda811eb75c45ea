/// Minor units per major unit for the currencies the storefront prices in.
/// Zero-decimal currencies are listed explicitly; everything else uses cents.
fn minor_units_per_major(currency: &str) -> u64 {
    match currency.to_ascii_lowercase().as_str() {
        "jpy" | "krw" | "vnd" | "clp" => 1,
        _ => 100,
    }
}

/// Format an amount stored in minor units for display, e.g. `12.50 USD`.
pub fn format_amount(amount_minor: u64, currency: &str) -> String {
    let code = currency.to_ascii_uppercase();
    match minor_units_per_major(currency) {
        1 => format!("{amount_minor} {code}"),
        per => format!("{}.{:02} {code}", amount_minor / per, amount_minor % per),
    }
}

/// Normalise a client-supplied currency code, rejecting anything that is not
/// three ASCII letters.
pub fn normalize_currency(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_lowercase())
    } else {
        None
    }
}
