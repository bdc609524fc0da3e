/// 租户数据缓存键前缀
const TENANT_PREFIX: &str = "tenant:";

/// 租户目录缓存键前缀（token -> 数据库名）
pub const TENANT_DIRECTORY_PREFIX: &str = "tenant_dir:";

/// 某个租户所有缓存键的公共前缀，用于整体失效
pub fn tenant_prefix(token: &str) -> String {
    format!("{}{}:", TENANT_PREFIX, token)
}

/// 生成租户内的数据缓存键
pub fn tenant_data_key(token: &str, name: &str) -> String {
    format!("{}{}", tenant_prefix(token), name)
}

/// 生成租户目录缓存键
pub fn tenant_directory_key(token: &str) -> String {
    format!("{}{}", TENANT_DIRECTORY_PREFIX, token)
}
