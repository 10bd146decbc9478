use anyhow::Result;

// Print the OpenAPI document for the HTTP API.
fn main() -> Result<()> {
    let doc = timekeeper::timekeeper::openapi();
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
