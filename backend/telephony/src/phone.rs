/// Normalize a dialable number to E.164.
///
/// Everything except digits and `+` is stripped. Numbers without a leading `+`
/// lose their trunk zeros and get `country_code` prepended, unless they already
/// start with the country code digits at full international length.
pub fn format_e164(raw: &str, country_code: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if cleaned.starts_with('+') {
        return cleaned;
    }

    let national = cleaned.trim_start_matches('0');
    let cc_digits = country_code.trim_start_matches('+');

    // "919876543210" is already international for a +91 default.
    if !cc_digits.is_empty()
        && national.starts_with(cc_digits)
        && national.len() == cc_digits.len() + 10
    {
        return format!("+{national}");
    }

    format!("+{cc_digits}{national}")
}
