use serde_json::Value;

use crate::ssh::shell_quote;

/// Build an `openclaw` invocation with every argument single-quoted.
pub fn openclaw_command(args: &[&str]) -> String {
    let mut cmd = String::from("openclaw");
    for arg in args {
        cmd.push(' ');
        cmd.push_str(&shell_quote(arg));
    }
    cmd
}

/// Same as [`openclaw_command`] with stderr folded into stdout.
pub fn openclaw_command_merged(args: &[&str]) -> String {
    format!("{} 2>&1", openclaw_command(args))
}

/// Extract the JSON payload from CLI output.
///
/// Plugins may print log lines (sometimes containing brackets) before the
/// payload, so the outermost object or array ending last in the output is
/// located and parsed.
pub fn parse_json_output(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let bytes = trimmed.as_bytes();
    let end = match (trimmed.rfind('}'), trimmed.rfind(']')) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return Err(format!("No JSON found in output: {trimmed}")),
    };

    let closer = bytes[end];
    let opener = if closer == b']' { b'[' } else { b'{' };
    let mut depth = 0i32;
    let mut start = None;
    for i in (0..=end).rev() {
        let ch = bytes[i];
        if ch == closer {
            depth += 1;
        } else if ch == opener {
            depth -= 1;
        }
        if depth == 0 {
            start = Some(i);
            break;
        }
    }

    let start = start.ok_or_else(|| format!("No JSON found in output: {trimmed}"))?;
    serde_json::from_str(&trimmed[start..=end]).map_err(|e| format!("Failed to parse JSON: {e}"))
}
