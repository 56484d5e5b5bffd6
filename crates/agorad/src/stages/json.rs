//! Tolerant JSON extraction from model output.

use serde::de::DeserializeOwned;

/// Pull the JSON object out of a model reply: bare, fenced, or embedded
pub fn extract_json(response: &str) -> Result<String, String> {
    let t = response.trim();
    if t.starts_with('{') && t.ends_with('}') {
        return Ok(t.to_string());
    }
    // ```json fenced block
    if let Some(s) = t.find("```json") {
        let body = &t[s + 7..];
        if let Some(e) = body.find("```") {
            let inner = body[..e].trim();
            if !inner.is_empty() {
                return Ok(inner.to_string());
            }
        }
    }
    // Plain fenced block
    if let Some(s) = t.find("```") {
        let body = &t[s + 3..];
        if let Some(e) = body.find("```") {
            let inner = body[..e]
                .lines()
                .skip_while(|l| !l.trim().starts_with('{'))
                .collect::<Vec<_>>()
                .join("\n");
            if !inner.trim().is_empty() {
                return Ok(inner);
            }
        }
    }
    // Anywhere in the text
    if let (Some(s), Some(e)) = (t.find('{'), t.rfind('}')) {
        if s < e {
            return Ok(t[s..=e].to_string());
        }
    }
    Err("no JSON object found in model output".to_string())
}

/// Extract and deserialize in one step
pub fn parse_reply<T: DeserializeOwned>(response: &str) -> Result<T, String> {
    let json = extract_json(response)?;
    serde_json::from_str(&json).map_err(|e| format!("malformed model JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct V {
        verdict: String,
    }

    #[test]
    fn test_bare_json() {
        assert_eq!(extract_json(" {\"a\":1} ").unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_fenced_json() {
        let reply = "Here you go:\n```json\n{\"verdict\":\"in_scope\"}\n```\nThanks";
        let v: V = parse_reply(reply).unwrap();
        assert_eq!(v.verdict, "in_scope");
    }

    #[test]
    fn test_plain_fence_and_embedded() {
        let reply = "```\nsome text\n{\"verdict\":\"ambiguous\"}\n```";
        let v: V = parse_reply(reply).unwrap();
        assert_eq!(v.verdict, "ambiguous");

        let v: V = parse_reply("Result: {\"verdict\":\"out_of_scope\"} done").unwrap();
        assert_eq!(v.verdict, "out_of_scope");
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json("I think it's in scope").is_err());
        assert!(parse_reply::<V>("{\"other\":1}").is_err());
    }
}
