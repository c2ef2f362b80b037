use globset::{GlobBuilder, GlobMatcher};
use tracing::debug;

/// 转义 glob 特殊字符，使文本在模式中按字面匹配
pub fn glob_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// 编译与 redis `KEYS` 语义一致的通配模式：`*` 可跨越 `/`，反斜杠转义
pub fn glob_matcher(pattern: &str) -> Option<GlobMatcher> {
    match GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
    {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            debug!(pattern, error = %e, "Invalid glob pattern");
            None
        }
    }
}

/// 单次匹配；模式不合法时不匹配任何键
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob_matcher(pattern).is_some_and(|m| m.is_match(text))
}
