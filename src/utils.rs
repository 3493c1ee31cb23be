use indicatif::ProgressStyle;
use regex::Regex;

use crate::error::{Error, Result};

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// 将逗号分隔的后缀列表转换为不区分大小写的正则表达式，例如 `png,jpg` -> `(?i)^(png|jpg)$`
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let parts = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s.trim_start_matches('.')))
        .collect::<Vec<_>>();
    if parts.is_empty() {
        return Err(Error::Config(format!("无效的后缀列表: {suffix:?}")));
    }
    Regex::new(&format!("(?i)^({})$", parts.join("|")))
        .map_err(|e| Error::Config(format!("无效的后缀列表: {e}")))
}
