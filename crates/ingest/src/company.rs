/// Label used whenever no company name can be recovered from a sender.
pub const UNKNOWN_COMPANY: &str = "Unknown";

/// Mailbox providers whose domain says nothing about the hiring company.
const GENERIC_PROVIDERS: &[&str] = &["gmail", "yahoo", "outlook", "hotmail", "mail"];

/// Derives a company name from a `From` header value.
///
/// For display-name form (`Acme Corp <hr@acme.com>`) the trimmed display
/// name wins outright, unless it is empty or itself contains an address.
/// Otherwise the first domain label of the address is capitalized, with
/// generic mailbox providers collapsed to [`UNKNOWN_COMPANY`].
pub fn extract_company(sender: &str) -> String {
    if let Some((display, rest)) = sender.split_once('<') {
        if sender.contains('>') {
            let name = display.trim();
            if !name.is_empty() && !name.contains('@') {
                return name.to_string();
            }
            let address = rest.split_once('>').map_or(rest, |(inside, _)| inside);
            return company_from_address(address);
        }
    }
    if sender.contains('@') {
        return company_from_address(sender);
    }
    UNKNOWN_COMPANY.to_string()
}

fn company_from_address(address: &str) -> String {
    let Some(domain) = address.split('@').nth(1) else {
        return UNKNOWN_COMPANY.to_string();
    };
    let label = domain.split('.').next().unwrap_or(domain);
    if label.is_empty() || GENERIC_PROVIDERS.contains(&label.to_lowercase().as_str()) {
        return UNKNOWN_COMPANY.to_string();
    }
    capitalize(label)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
