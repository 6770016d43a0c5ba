//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the course catalog API to a file, by
//! default `openapi.json`; pass another path as the first argument.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    let document = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(&path, document)?;
    println!("OpenAPI document written to {}", path);
    Ok(())
}
