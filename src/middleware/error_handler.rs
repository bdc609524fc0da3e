use axum::{
    body::{Body, to_bytes},
    http::{Request, header},
    middleware::Next,
    response::Response,
};

/// 错误响应体最多记录的字节数
const MAX_LOGGED_BODY: usize = 1024;

/// 为了记录日志而读取的响应体上限，超过时放弃读取
const MAX_BUFFERED_BODY: usize = 16 * 1024 * 1024;

/// 记录所有 5xx 响应，包括请求路径和响应体
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    if !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(%method, path, status = parts.status.as_u16(), error = %e, "Failed to read error response body");
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let logged = &bytes[..bytes.len().min(MAX_LOGGED_BODY)];
    tracing::error!(
        %method,
        path,
        status = parts.status.as_u16(),
        body = %String::from_utf8_lossy(logged),
        truncated = bytes.len() > MAX_LOGGED_BODY,
        "Server error occurred"
    );

    // body 已经被读出，按原内容重建
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}
