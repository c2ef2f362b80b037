use super::CacheKeyBuilder;

/// 响应缓存键前缀
pub const RESPONSE_PREFIX: &str = "response";

/// 生成响应缓存键：规范化路径 + 排序后的查询参数
pub fn response_key(path: &str, query: Option<&str>) -> String {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };
    CacheKeyBuilder::new(RESPONSE_PREFIX)
        .segment(path)
        .query(query)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_params_in_any_order_share_a_key() {
        assert_eq!(
            response_key("/events/", Some("b=2&a=1")),
            response_key("/events", Some("a=1&b=2"))
        );
        assert_ne!(
            response_key("/events", Some("a=1")),
            response_key("/events", Some("a=2"))
        );
    }
}
