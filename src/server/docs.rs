//! Interactive documentation pages for the aggregated API document.

const SWAGGER_UI_CDN: &str = "https://cdn.jsdelivr.net/npm/swagger-ui-dist@5";
const REDOC_CDN: &str = "https://cdn.jsdelivr.net/npm/redoc@2/bundles/redoc.standalone.js";

/// `info.title` of the document, or a generic title.
pub fn document_title(document: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(document)
        .ok()
        .and_then(|v| v.pointer("/info/title").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "API".to_string())
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn swagger_ui_html(title: &str, openapi_url: &str) -> String {
    let title = escape_html(title);
    let url = escape_html(openapi_url);
    format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title} - Swagger UI</title>
<link rel="stylesheet" href="{cdn}/swagger-ui.css">
</head>
<body>
<div id="swagger-ui"></div>
<script src="{cdn}/swagger-ui-bundle.js"></script>
<script>
SwaggerUIBundle({{ url: "{url}", dom_id: "#swagger-ui", deepLinking: true }});
</script>
</body>
</html>
"##,
        cdn = SWAGGER_UI_CDN,
    )
}

pub fn redoc_html(title: &str, openapi_url: &str) -> String {
    let title = escape_html(title);
    let url = escape_html(openapi_url);
    format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title} - ReDoc</title>
</head>
<body>
<redoc spec-url="{url}"></redoc>
<script src="{cdn}"></script>
</body>
</html>
"##,
        cdn = REDOC_CDN,
    )
}
