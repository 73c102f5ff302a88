

use chrono::Utc;


pub const ROOT: &str = "ROOT";


#[inline]
pub fn gen_id(model_name: &str, model_id: &str) -> String {
    format!("{}({})", model_name, model_id)
}


pub fn split_gen_id(id: &str) -> Option<(&str, &str)> {
    let open = id.find('(')?;
    let inner = id[open + 1..].strip_suffix(')')?;
    let model_name = &id[..open];
    if model_name.is_empty() || inner.is_empty() {
        return None;
    }
    Some((model_name, inner))
}


#[inline]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}


#[inline]
pub fn safe_truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}
