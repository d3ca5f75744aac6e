//! Text normalization for titles, usernames and links

/// Uzbek/Russian Cyrillic to Latin, applied after lowercasing
fn transliterate_char(c: char) -> Option<&'static str> {
    let latin = match c {
        'ш' | 'щ' => "sh",
        'ч' => "ch",
        'ў' => "o",
        'ғ' => "g",
        'қ' => "q",
        'ҳ' => "h",
        'ю' => "yu",
        'я' => "ya",
        'ё' => "yo",
        'ц' => "ts",
        'ы' => "y",
        'э' => "e",
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' => "e",
        'ж' => "j",
        'з' => "z",
        'и' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ъ' | 'ь' => "",
        _ => return None,
    };
    Some(latin)
}

pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        match transliterate_char(c) {
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

/// Lowercase, transliterate, drop anything that is not alphanumeric or
/// whitespace, collapse runs of whitespace
pub fn normalize_title(title: &str) -> String {
    let kept: String = transliterate(title)
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip whitespace and a leading `@`, keep `[a-z0-9_]`, lowercase
pub fn normalize_username(username: &str) -> Option<String> {
    let trimmed = username.trim().trim_start_matches('@');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Username form of a free-text topic: normalized title with spaces as `_`
pub fn username_form(text: &str) -> Option<String> {
    let title = normalize_title(text);
    normalize_username(&title.replace(' ', "_"))
}

/// Extract the username from a `t.me` / `telegram.me` link
pub fn normalize_link(link: &str) -> Option<String> {
    let mut s = link.trim();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest;
            break;
        }
    }
    s = s.strip_prefix("www.").unwrap_or(s);

    let mut matched = false;
    for host in ["t.me/", "telegram.me/"] {
        if let Some(rest) = s.strip_prefix(host) {
            s = rest;
            matched = true;
            break;
        }
    }
    if !matched {
        return None;
    }

    s = s.strip_prefix("joinchat/").unwrap_or(s);
    let s = s.split('?').next().unwrap_or("");
    let s = s.split('/').next().unwrap_or("");
    normalize_username(s)
}

/// Bare platform username syntax: a letter, then 4..=31 of `[A-Za-z0-9_]`
pub fn is_username_syntax(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }

    let rest: Vec<char> = chars.collect();
    (4..=31).contains(&rest.len()) && rest.iter().all(|c| c.is_ascii_alphanumeric() || *c == '_')
}

/// If `raw` is an explicit handle, return the normalized username
///
/// Accepted forms: `@name`, a `t.me/...` or `telegram.me/...` link, or a
/// bare token in username syntax. Anything with spaces is a topic, not a
/// handle.
pub fn explicit_handle(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix('@') {
        return if is_username_syntax(rest) {
            normalize_username(rest)
        } else {
            None
        };
    }

    let lower = trimmed.to_lowercase();
    if lower.contains("t.me/") || lower.contains("telegram.me/") {
        return normalize_link(trimmed);
    }

    if is_username_syntax(trimmed) {
        return normalize_username(trimmed);
    }

    None
}
