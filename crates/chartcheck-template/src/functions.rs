//! Template function library
//!
//! The Go builtins plus the subset of Sprig and Helm functions charts lean
//! on. Every function receives its arguments already evaluated, with a piped
//! value appended last, matching Go's calling convention.

use base64::Engine as _;
use phf::phf_map;
use semver::{Version, VersionReq};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

use crate::exec::{Exec, ExecError, ExecResult};

/// Maximum edit distance for "did you mean" hints
const MAX_SUGGESTION_DISTANCE: usize = 3;

pub type Func = fn(&mut Exec<'_>, Vec<JsonValue>) -> ExecResult<JsonValue>;

/// Every callable function by name (`and`/`or` short-circuit in the evaluator)
pub static FUNCTIONS: phf::Map<&'static str, Func> = phf_map! {
    // Logic and comparison
    "not" => not,
    "eq" => eq,
    "ne" => ne,
    "lt" => lt,
    "le" => le,
    "gt" => gt,
    "ge" => ge,
    "default" => default,
    "empty" => empty,
    "coalesce" => coalesce,
    "ternary" => ternary,
    "required" => required,
    "fail" => fail,

    // Strings
    "quote" => quote,
    "squote" => squote,
    "upper" => upper,
    "lower" => lower,
    "title" => title,
    "trim" => trim,
    "trimSuffix" => trim_suffix,
    "trimPrefix" => trim_prefix,
    "trunc" => trunc,
    "replace" => replace,
    "contains" => contains,
    "hasPrefix" => has_prefix,
    "hasSuffix" => has_suffix,
    "printf" => printf,
    "print" => print,
    "println" => println,
    "repeat" => repeat,
    "cat" => cat,
    "splitList" => split_list,
    "join" => join,
    "indent" => indent,
    "nindent" => nindent,
    "toString" => to_string,

    // Encoding
    "b64enc" => b64enc,
    "b64dec" => b64dec,
    "sha256sum" => sha256sum,
    "regexMatch" => regex_match,
    "regexReplaceAll" => regex_replace_all,
    "toYaml" => to_yaml,
    "toJson" => to_json,
    "fromYaml" => from_yaml,
    "fromJson" => from_json,

    // Numbers
    "int" => int,
    "int64" => int,
    "float64" => float64,
    "atoi" => atoi,

    // Collections
    "list" => list,
    "dict" => dict,
    "get" => get,
    "set" => set,
    "unset" => unset,
    "hasKey" => has_key,
    "keys" => keys,
    "index" => index,
    "len" => len,
    "first" => first,
    "last" => last,
    "append" => append,
    "has" => has,
    "merge" => merge,
    "mergeOverwrite" => merge_overwrite,

    // Templates and cluster
    "include" => include,
    "tpl" => tpl,
    "lookup" => lookup,
    "semverCompare" => semver_compare,
};

/// Suggest the closest known function name
pub fn suggest_function(name: &str) -> Option<&'static str> {
    FUNCTIONS
        .keys()
        .copied()
        .chain(["and", "or"])
        .map(|candidate| (strsim::levenshtein(name, candidate), candidate))
        .filter(|(distance, _)| *distance > 0 && *distance <= MAX_SUGGESTION_DISTANCE)
        .min()
        .map(|(_, candidate)| candidate)
}

// =============================================================================
// Value helpers
// =============================================================================

/// Go template truthiness
pub fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Render a value the way an action prints it
pub fn print_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        other => format_value(other),
    }
}

/// Go's `%v` formatting, with `<nil>` for nested nulls
fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "<nil>".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => format_float(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(" "))
        }
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let inner: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", k, format_value(v)))
                .collect();
            format!("map[{}]", inner.join(" "))
        }
    }
}

/// `%v` for float64: shortest representation, exponent form outside [1e-4, 1e21)
fn format_float(f: f64) -> String {
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e21).contains(&abs) {
        let formatted = format!("{:e}", f);
        if let Some((mantissa, exponent)) = formatted.split_once('e') {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            return format!("{}e{}{:0>2}", mantissa, sign, digits);
        }
        formatted
    } else {
        f.to_string()
    }
}

/// Go type name of a value, for error messages
pub fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "<nil>",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_f64() => "float64",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "[]interface {}",
        JsonValue::Object(_) => "map[string]interface {}",
    }
}

/// Sprig's `strval`
fn strval(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => format_value(other),
    }
}

fn to_i64(value: &JsonValue) -> i64 {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or_default(),
        JsonValue::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn to_f64(value: &JsonValue) -> f64 {
    match value {
        JsonValue::Number(n) => n.as_f64().unwrap_or_default(),
        JsonValue::String(s) => s.trim().parse().unwrap_or_default(),
        JsonValue::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

fn float_value(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn want(name: &str, args: &[JsonValue], count: usize) -> ExecResult<()> {
    if args.len() == count {
        Ok(())
    } else {
        Err(ExecError::msg(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            count,
            args.len()
        )))
    }
}

fn want_at_least(name: &str, args: &[JsonValue], count: usize) -> ExecResult<()> {
    if args.len() >= count {
        Ok(())
    } else {
        Err(ExecError::msg(format!(
            "wrong number of args for {}: want at least {} got {}",
            name,
            count,
            args.len()
        )))
    }
}

/// Go's `%q`
fn go_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// =============================================================================
// Logic and comparison
// =============================================================================

fn not(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("not", &args, 1)?;
    Ok(JsonValue::Bool(!truthy(&args[0])))
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// `eq a b c`: true when `a` equals any of the rest
fn eq(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want_at_least("eq", &args, 2)?;
    let (first, rest) = args.split_at(1);
    Ok(JsonValue::Bool(
        rest.iter().any(|other| values_equal(&first[0], other)),
    ))
}

fn ne(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("ne", &args, 2)?;
    Ok(JsonValue::Bool(!values_equal(&args[0], &args[1])))
}

fn compare(name: &str, args: &[JsonValue]) -> ExecResult<std::cmp::Ordering> {
    want(name, args, 2)?;
    match (&args[0], &args[1]) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .ok_or_else(|| ExecError::msg("invalid type for comparison")),
        (JsonValue::String(a), JsonValue::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExecError::msg("incompatible types for comparison")),
    }
}

fn lt(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    Ok(JsonValue::Bool(compare("lt", &args)?.is_lt()))
}

fn le(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    Ok(JsonValue::Bool(compare("le", &args)?.is_le()))
}

fn gt(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    Ok(JsonValue::Bool(compare("gt", &args)?.is_gt()))
}

fn ge(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    Ok(JsonValue::Bool(compare("ge", &args)?.is_ge()))
}

/// `default "x" .Values.y`: the given value unless it is empty
fn default(_: &mut Exec<'_>, mut args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want_at_least("default", &args, 1)?;
    let fallback = args.remove(0);
    match args.into_iter().next() {
        Some(given) if truthy(&given) => Ok(given),
        _ => Ok(fallback),
    }
}

fn empty(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("empty", &args, 1)?;
    Ok(JsonValue::Bool(!truthy(&args[0])))
}

fn coalesce(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    Ok(args.into_iter().find(truthy).unwrap_or(JsonValue::Null))
}

/// `ternary "yes" "no" .cond`
fn ternary(_: &mut Exec<'_>, mut args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("ternary", &args, 3)?;
    let condition = truthy(&args[2]);
    Ok(if condition {
        args.swap_remove(0)
    } else {
        args.swap_remove(1)
    })
}

/// `required "msg" .Values.x`: aborts rendering when the value is missing
fn required(_: &mut Exec<'_>, mut args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("required", &args, 2)?;
    let value = args.pop().unwrap_or(JsonValue::Null);
    match &value {
        JsonValue::Null => Err(ExecError::Abort(strval(&args[0]))),
        JsonValue::String(s) if s.is_empty() => Err(ExecError::Abort(strval(&args[0]))),
        _ => Ok(value),
    }
}

fn fail(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("fail", &args, 1)?;
    Err(ExecError::Abort(strval(&args[0])))
}

// =============================================================================
// Strings
// =============================================================================

fn quote(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    let quoted: Vec<String> = args
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| go_quote(&strval(v)))
        .collect();
    Ok(JsonValue::String(quoted.join(" ")))
}

fn squote(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    let quoted: Vec<String> = args
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| format!("'{}'", strval(v)))
        .collect();
    Ok(JsonValue::String(quoted.join(" ")))
}

fn upper(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("upper", &args, 1)?;
    Ok(JsonValue::String(strval(&args[0]).to_uppercase()))
}

fn lower(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("lower", &args, 1)?;
    Ok(JsonValue::String(strval(&args[0]).to_lowercase()))
}

fn title(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("title", &args, 1)?;
    let mut out = String::new();
    let mut at_word_start = true;
    for c in strval(&args[0]).chars() {
        if at_word_start && c.is_alphanumeric() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace() || c == '-' || c == '_';
    }
    Ok(JsonValue::String(out))
}

fn trim(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("trim", &args, 1)?;
    Ok(JsonValue::String(strval(&args[0]).trim().to_string()))
}

fn trim_suffix(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("trimSuffix", &args, 2)?;
    let suffix = strval(&args[0]);
    let value = strval(&args[1]);
    Ok(JsonValue::String(
        value.strip_suffix(suffix.as_str()).unwrap_or(&value).to_string(),
    ))
}

fn trim_prefix(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("trimPrefix", &args, 2)?;
    let prefix = strval(&args[0]);
    let value = strval(&args[1]);
    Ok(JsonValue::String(
        value.strip_prefix(prefix.as_str()).unwrap_or(&value).to_string(),
    ))
}

/// `trunc 63 .name`; a negative length keeps the tail
fn trunc(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("trunc", &args, 2)?;
    let length = to_i64(&args[0]);
    let chars: Vec<char> = strval(&args[1]).chars().collect();
    let count = chars.len() as i64;
    let kept: String = if length < 0 && count + length > 0 {
        chars[(count + length) as usize..].iter().collect()
    } else if length >= 0 && count > length {
        chars[..length as usize].iter().collect()
    } else {
        chars.into_iter().collect()
    };
    Ok(JsonValue::String(kept))
}

fn replace(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("replace", &args, 3)?;
    Ok(JsonValue::String(
        strval(&args[2]).replace(&strval(&args[0]), &strval(&args[1])),
    ))
}

fn contains(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("contains", &args, 2)?;
    Ok(JsonValue::Bool(strval(&args[1]).contains(&strval(&args[0]))))
}

fn has_prefix(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("hasPrefix", &args, 2)?;
    Ok(JsonValue::Bool(strval(&args[1]).starts_with(&strval(&args[0]))))
}

fn has_suffix(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("hasSuffix", &args, 2)?;
    Ok(JsonValue::Bool(strval(&args[1]).ends_with(&strval(&args[0]))))
}

/// Go `fmt.Sprintf` for the verbs templates use: `%s %v %d %q %t %f %x %%`
fn printf(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want_at_least("printf", &args, 1)?;
    let format = strval(&args[0]);
    let values = &args[1..];
    let mut out = String::with_capacity(format.len() + values.len() * 8);
    let mut next = 0;
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut left_align = false;
        let mut zero_pad = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left_align = true,
                '0' => zero_pad = true,
                '+' | ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            precision = Some(digits.parse::<usize>().unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        let Some(value) = values.get(next) else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };
        next += 1;

        let formatted = match verb {
            's' | 'v' => strval(value),
            'q' => go_quote(&strval(value)),
            't' => match value {
                JsonValue::Bool(b) => b.to_string(),
                other => format!("%!t({}={})", type_name(other), strval(other)),
            },
            'd' => match value {
                JsonValue::Number(n) if !n.is_f64() => to_i64(value).to_string(),
                other => format!("%!d({}={})", type_name(other), strval(other)),
            },
            'f' | 'F' => match value {
                JsonValue::Number(_) => format!("{:.*}", precision.unwrap_or(6), to_f64(value)),
                other => format!("%!f({}={})", type_name(other), strval(other)),
            },
            'x' => match value {
                JsonValue::Number(n) if !n.is_f64() => format!("{:x}", to_i64(value)),
                other => strval(other).bytes().map(|b| format!("{:02x}", b)).collect(),
            },
            other => format!("%!{}({}={})", other, type_name(value), strval(value)),
        };

        let width: usize = width.parse().unwrap_or(0);
        let padding = width.saturating_sub(formatted.chars().count());
        if left_align {
            out.push_str(&formatted);
            out.push_str(&" ".repeat(padding));
        } else {
            out.push_str(&(if zero_pad { "0" } else { " " }).repeat(padding));
            out.push_str(&formatted);
        }
    }

    if next < values.len() {
        let extra: Vec<String> = values[next..]
            .iter()
            .map(|v| format!("{}={}", type_name(v), strval(v)))
            .collect();
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }

    Ok(JsonValue::String(out))
}

/// Go `fmt.Sprint`: spaces only between operands that are not strings
fn print(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
            out.push(' ');
        }
        out.push_str(&format_value(arg));
    }
    Ok(JsonValue::String(out))
}

fn println(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    let parts: Vec<String> = args.iter().map(format_value).collect();
    Ok(JsonValue::String(format!("{}\n", parts.join(" "))))
}

fn repeat(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("repeat", &args, 2)?;
    let count = usize::try_from(to_i64(&args[0])).unwrap_or(0);
    Ok(JsonValue::String(strval(&args[1]).repeat(count)))
}

fn cat(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    let parts: Vec<String> = args.iter().filter(|v| !v.is_null()).map(strval).collect();
    Ok(JsonValue::String(parts.join(" ")))
}

fn split_list(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("splitList", &args, 2)?;
    let sep = strval(&args[0]);
    let value = strval(&args[1]);
    Ok(JsonValue::Array(
        value
            .split(sep.as_str())
            .map(|s| JsonValue::String(s.to_string()))
            .collect(),
    ))
}

fn join(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("join", &args, 2)?;
    let sep = strval(&args[0]);
    let joined = match &args[1] {
        JsonValue::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(strval)
            .collect::<Vec<_>>()
            .join(&sep),
        other => strval(other),
    };
    Ok(JsonValue::String(joined))
}

fn pad_lines(spaces: &JsonValue, text: &JsonValue) -> String {
    let pad = " ".repeat(usize::try_from(to_i64(spaces)).unwrap_or(0));
    format!("{}{}", pad, strval(text).replace('\n', &format!("\n{}", pad)))
}

/// `indent 4 .text`: pads every line, empty ones included
fn indent(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("indent", &args, 2)?;
    Ok(JsonValue::String(pad_lines(&args[0], &args[1])))
}

fn nindent(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("nindent", &args, 2)?;
    Ok(JsonValue::String(format!("\n{}", pad_lines(&args[0], &args[1]))))
}

fn to_string(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("toString", &args, 1)?;
    Ok(JsonValue::String(strval(&args[0])))
}

// =============================================================================
// Encoding
// =============================================================================

fn b64enc(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("b64enc", &args, 1)?;
    Ok(JsonValue::String(
        base64::engine::general_purpose::STANDARD.encode(strval(&args[0]).as_bytes()),
    ))
}

/// Decoding errors come back as the result text, as Sprig does
fn b64dec(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("b64dec", &args, 1)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(strval(&args[0]).as_bytes())
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));
    Ok(JsonValue::String(decoded.unwrap_or_else(|e| e)))
}

fn sha256sum(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("sha256sum", &args, 1)?;
    let mut hasher = Sha256::new();
    hasher.update(strval(&args[0]).as_bytes());
    Ok(JsonValue::String(format!("{:x}", hasher.finalize())))
}

fn regex_match(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("regexMatch", &args, 2)?;
    let matched = regex::Regex::new(&strval(&args[0]))
        .map(|re| re.is_match(&strval(&args[1])))
        .unwrap_or(false);
    Ok(JsonValue::Bool(matched))
}

fn regex_replace_all(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("regexReplaceAll", &args, 3)?;
    let re = regex::Regex::new(&strval(&args[0])).map_err(|e| ExecError::msg(e.to_string()))?;
    Ok(JsonValue::String(
        re.replace_all(&strval(&args[1]), strval(&args[2]).as_str())
            .into_owned(),
    ))
}

/// YAML without the trailing newline
fn to_yaml(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("toYaml", &args, 1)?;
    let yaml = serde_yaml::to_string(&args[0]).unwrap_or_default();
    Ok(JsonValue::String(yaml.trim_end_matches('\n').to_string()))
}

fn to_json(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("toJson", &args, 1)?;
    Ok(JsonValue::String(
        serde_json::to_string(&args[0]).unwrap_or_default(),
    ))
}

/// Parse failures produce `{"Error": ...}` rather than aborting, as in Helm
fn from_yaml(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("fromYaml", &args, 1)?;
    let text = strval(&args[0]);
    if text.trim().is_empty() {
        return Ok(JsonValue::Object(Map::new()));
    }
    Ok(match serde_yaml::from_str::<JsonValue>(&text) {
        Ok(JsonValue::Null) => JsonValue::Object(Map::new()),
        Ok(value) => value,
        Err(e) => serde_json::json!({ "Error": e.to_string() }),
    })
}

fn from_json(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("fromJson", &args, 1)?;
    Ok(match serde_json::from_str::<JsonValue>(&strval(&args[0])) {
        Ok(value) => value,
        Err(e) => serde_json::json!({ "Error": e.to_string() }),
    })
}

// =============================================================================
// Numbers
// =============================================================================

fn int(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("int", &args, 1)?;
    Ok(JsonValue::from(to_i64(&args[0])))
}

fn float64(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("float64", &args, 1)?;
    Ok(float_value(to_f64(&args[0])))
}

fn atoi(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("atoi", &args, 1)?;
    Ok(JsonValue::from(
        strval(&args[0]).trim().parse::<i64>().unwrap_or_default(),
    ))
}

// =============================================================================
// Collections
// =============================================================================

fn list(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    Ok(JsonValue::Array(args))
}

/// `dict "k1" v1 "k2" v2`; a dangling key maps to ""
fn dict(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    let mut map = Map::new();
    for pair in args.chunks(2) {
        let value = pair.get(1).cloned().unwrap_or_else(|| JsonValue::from(""));
        map.insert(strval(&pair[0]), value);
    }
    Ok(JsonValue::Object(map))
}

fn expect_map<'v>(name: &str, value: &'v mut JsonValue) -> ExecResult<&'v mut Map<String, JsonValue>> {
    match value {
        JsonValue::Object(map) => Ok(map),
        other => Err(ExecError::msg(format!(
            "{} expects a dict, got {}",
            name,
            type_name(other)
        ))),
    }
}

fn get(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("get", &args, 2)?;
    let key = strval(&args[1]);
    Ok(args[0]
        .as_object()
        .and_then(|map| map.get(&key))
        .cloned()
        .unwrap_or_else(|| JsonValue::from("")))
}

fn set(_: &mut Exec<'_>, mut args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("set", &args, 3)?;
    let value = args.pop().unwrap_or(JsonValue::Null);
    let key = strval(&args[1]);
    expect_map("set", &mut args[0])?.insert(key, value);
    Ok(args.swap_remove(0))
}

fn unset(_: &mut Exec<'_>, mut args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("unset", &args, 2)?;
    let key = strval(&args[1]);
    expect_map("unset", &mut args[0])?.remove(&key);
    Ok(args.swap_remove(0))
}

fn has_key(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("hasKey", &args, 2)?;
    let key = strval(&args[1]);
    Ok(JsonValue::Bool(
        args[0].as_object().is_some_and(|map| map.contains_key(&key)),
    ))
}

fn keys(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    let mut all: Vec<String> = args
        .iter()
        .filter_map(JsonValue::as_object)
        .flat_map(|map| map.keys().cloned())
        .collect();
    all.sort();
    Ok(JsonValue::Array(all.into_iter().map(JsonValue::String).collect()))
}

/// `index .list 0` or `index .map "key" "nested"`
fn index(_: &mut Exec<'_>, mut args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want_at_least("index", &args, 1)?;
    let keys = args.split_off(1);
    let mut current = args.swap_remove(0);
    for key in keys {
        current = match current {
            JsonValue::Array(mut items) => {
                let i = to_i64(&key);
                if i < 0 || i as usize >= items.len() {
                    return Err(ExecError::msg(format!("index out of range: {}", i)));
                }
                items.swap_remove(i as usize)
            }
            JsonValue::Object(mut map) => map.remove(&strval(&key)).unwrap_or(JsonValue::Null),
            JsonValue::Null => return Err(ExecError::msg("index of untyped nil")),
            other => {
                return Err(ExecError::msg(format!(
                    "can't index item of type {}",
                    type_name(&other)
                )));
            }
        };
    }
    Ok(current)
}

fn len(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("len", &args, 1)?;
    let length = match &args[0] {
        JsonValue::String(s) => s.len(),
        JsonValue::Array(items) => items.len(),
        JsonValue::Object(map) => map.len(),
        JsonValue::Null => return Err(ExecError::msg("len of nil pointer")),
        other => {
            return Err(ExecError::msg(format!("len of type {}", type_name(other))));
        }
    };
    Ok(JsonValue::from(length))
}

fn first(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("first", &args, 1)?;
    Ok(args[0]
        .as_array()
        .and_then(|items| items.first())
        .cloned()
        .unwrap_or(JsonValue::Null))
}

fn last(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("last", &args, 1)?;
    Ok(args[0]
        .as_array()
        .and_then(|items| items.last())
        .cloned()
        .unwrap_or(JsonValue::Null))
}

fn append(_: &mut Exec<'_>, mut args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("append", &args, 2)?;
    let value = args.pop().unwrap_or(JsonValue::Null);
    match args.swap_remove(0) {
        JsonValue::Array(mut items) => {
            items.push(value);
            Ok(JsonValue::Array(items))
        }
        JsonValue::Null => Ok(JsonValue::Array(vec![value])),
        other => Err(ExecError::msg(format!(
            "cannot append to type {}",
            type_name(&other)
        ))),
    }
}

/// `has 4 $list`
fn has(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("has", &args, 2)?;
    Ok(JsonValue::Bool(
        args[1]
            .as_array()
            .is_some_and(|items| items.iter().any(|v| values_equal(v, &args[0]))),
    ))
}

fn deep_merge(dst: &mut Map<String, JsonValue>, src: &Map<String, JsonValue>, overwrite: bool) {
    for (key, value) in src {
        match (dst.get_mut(key), value) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
                deep_merge(existing, incoming, overwrite);
            }
            (Some(existing), incoming) => {
                if overwrite || existing.is_null() {
                    *existing = incoming.clone();
                }
            }
            (None, incoming) => {
                dst.insert(key.clone(), incoming.clone());
            }
        }
    }
}

fn merge_with(name: &str, mut args: Vec<JsonValue>, overwrite: bool) -> ExecResult<JsonValue> {
    want_at_least(name, &args, 1)?;
    let sources = args.split_off(1);
    let mut dst = args.swap_remove(0);
    let map = expect_map(name, &mut dst)?;
    for source in &sources {
        if let JsonValue::Object(src) = source {
            deep_merge(map, src, overwrite);
        }
    }
    Ok(dst)
}

/// `merge $dst $src...`: existing keys in `$dst` win
fn merge(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    merge_with("merge", args, false)
}

fn merge_overwrite(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    merge_with("mergeOverwrite", args, true)
}

// =============================================================================
// Templates and cluster
// =============================================================================

fn include(exec: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("include", &args, 2)?;
    let name = strval(&args[0]);
    exec.include(&name, &args[1]).map(JsonValue::String)
}

fn tpl(exec: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("tpl", &args, 2)?;
    let source = strval(&args[0]);
    exec.render_string(&source, &args[1]).map(JsonValue::String)
}

/// No cluster is ever contacted, so lookups find nothing
fn lookup(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("lookup", &args, 4)?;
    Ok(JsonValue::Object(Map::new()))
}

/// Version with any prerelease or build suffix dropped
fn parse_loose_version(raw: &str) -> Option<Version> {
    let core = raw
        .trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()
        .unwrap_or_default();
    let mut parts = core.split('.').map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().transpose().ok()?.unwrap_or(0);
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// Normalize `>= 1.2 <2.0-0` into `>=1.2, <2.0`
fn parse_constraint(raw: &str) -> Option<VersionReq> {
    let mut comparators = Vec::new();
    let mut pending_op = String::new();
    for token in raw.split([' ', ',']).filter(|t| !t.is_empty()) {
        if token.chars().all(|c| "<>=!~^".contains(c)) {
            pending_op.push_str(token);
            continue;
        }
        let version = token.split('-').next().unwrap_or(token);
        comparators.push(format!("{}{}", std::mem::take(&mut pending_op), version));
    }
    VersionReq::parse(&comparators.join(", ")).ok()
}

/// `semverCompare ">=1.21-0" .Capabilities.KubeVersion.Version`
fn semver_compare(_: &mut Exec<'_>, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
    want("semverCompare", &args, 2)?;
    let constraint = strval(&args[0]);
    let version = strval(&args[1]);
    let version = parse_loose_version(&version)
        .ok_or_else(|| ExecError::msg(format!("invalid semantic version: {}", version)))?;

    let mut matched = false;
    for alternative in constraint.split("||") {
        let req = parse_constraint(alternative)
            .ok_or_else(|| ExecError::msg(format!("improper constraint: {}", constraint)))?;
        matched |= req.matches(&version);
    }
    Ok(JsonValue::Bool(matched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::TemplateSet;
    use serde_json::json;

    fn call(name: &str, args: Vec<JsonValue>) -> ExecResult<JsonValue> {
        let set = TemplateSet::default();
        let mut exec = Exec::new(&set, "test");
        let func = FUNCTIONS.get(name).unwrap();
        func(&mut exec, args)
    }

    fn call_ok(name: &str, args: Vec<JsonValue>) -> JsonValue {
        call(name, args).unwrap_or_else(|e| panic!("{}: {}", name, e.message()))
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!({})));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(0.5)));
        assert!(truthy(&json!({"a": 1})));
    }

    #[test]
    fn test_print_value() {
        assert_eq!(print_value(&json!(null)), "");
        assert_eq!(print_value(&json!([1, "a", null])), "[1 a <nil>]");
        assert_eq!(print_value(&json!({"b": 2, "a": 1})), "map[a:1 b:2]");
        assert_eq!(print_value(&json!(1.5)), "1.5");
        assert_eq!(print_value(&json!(1e21)), "1e+21");
    }

    #[test]
    fn test_default_and_empty() {
        assert_eq!(call_ok("default", vec![json!("x"), json!(null)]), json!("x"));
        assert_eq!(call_ok("default", vec![json!("x"), json!("")]), json!("x"));
        assert_eq!(call_ok("default", vec![json!("x"), json!("y")]), json!("y"));
        assert_eq!(call_ok("default", vec![json!("x")]), json!("x"));
        assert_eq!(call_ok("empty", vec![json!({})]), json!(true));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(call_ok("eq", vec![json!(1), json!(1.0)]), json!(true));
        assert_eq!(call_ok("eq", vec![json!("a"), json!("b"), json!("a")]), json!(true));
        assert_eq!(call_ok("lt", vec![json!(1), json!(2)]), json!(true));
        assert_eq!(call_ok("ge", vec![json!("b"), json!("a")]), json!(true));
        assert!(call("lt", vec![json!(1), json!("a")]).is_err());
    }

    #[test]
    fn test_required_and_fail_abort() {
        let err = call("required", vec![json!("need x"), json!(null)]).unwrap_err();
        assert_eq!(err, ExecError::Abort("need x".into()));
        assert_eq!(
            call_ok("required", vec![json!("need x"), json!("ok")]),
            json!("ok")
        );
        assert_eq!(
            call("fail", vec![json!("boom")]).unwrap_err(),
            ExecError::Abort("boom".into())
        );
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call_ok("quote", vec![json!("a\"b")]), json!(r#""a\"b""#));
        assert_eq!(call_ok("quote", vec![json!(3)]), json!(r#""3""#));
        assert_eq!(call_ok("squote", vec![json!("x")]), json!("'x'"));
        assert_eq!(call_ok("title", vec![json!("hello world")]), json!("Hello World"));
        assert_eq!(call_ok("trunc", vec![json!(3), json!("abcdef")]), json!("abc"));
        assert_eq!(call_ok("trunc", vec![json!(-2), json!("abcdef")]), json!("ef"));
        assert_eq!(
            call_ok("trimSuffix", vec![json!("-"), json!("name-")]),
            json!("name")
        );
        assert_eq!(
            call_ok("replace", vec![json!("."), json!("-"), json!("a.b.c")]),
            json!("a-b-c")
        );
        assert_eq!(
            call_ok("splitList", vec![json!(","), json!("a,b")]),
            json!(["a", "b"])
        );
        assert_eq!(call_ok("join", vec![json!("-"), json!(["a", 1])]), json!("a-1"));
        assert_eq!(call_ok("cat", vec![json!("a"), json!(null), json!(2)]), json!("a 2"));
    }

    #[test]
    fn test_indent() {
        assert_eq!(
            call_ok("indent", vec![json!(2), json!("a\nb")]),
            json!("  a\n  b")
        );
        assert_eq!(
            call_ok("nindent", vec![json!(2), json!("a: 1")]),
            json!("\n  a: 1")
        );
    }

    #[test]
    fn test_printf() {
        assert_eq!(
            call_ok("printf", vec![json!("%s-%d"), json!("app"), json!(3)]),
            json!("app-3")
        );
        assert_eq!(
            call_ok("printf", vec![json!("%q %v %%"), json!("x"), json!(true)]),
            json!(r#""x" true %"#)
        );
        assert_eq!(call_ok("printf", vec![json!("%.2f"), json!(1.5)]), json!("1.50"));
        assert_eq!(call_ok("printf", vec![json!("%5s|"), json!("ab")]), json!("   ab|"));
        assert_eq!(call_ok("printf", vec![json!("%s")]), json!("%!s(MISSING)"));
    }

    #[test]
    fn test_print() {
        assert_eq!(call_ok("print", vec![json!("a"), json!("b")]), json!("ab"));
        assert_eq!(call_ok("print", vec![json!(1), json!(2)]), json!("1 2"));
        assert_eq!(call_ok("println", vec![json!("a"), json!(1)]), json!("a 1\n"));
    }

    #[test]
    fn test_encoding() {
        assert_eq!(call_ok("b64enc", vec![json!("hello")]), json!("aGVsbG8="));
        assert_eq!(call_ok("b64dec", vec![json!("aGVsbG8=")]), json!("hello"));
        assert_eq!(
            call_ok("sha256sum", vec![json!("hello")]),
            json!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_eq!(
            call_ok("regexMatch", vec![json!("^a+$"), json!("aaa")]),
            json!(true)
        );
        assert_eq!(
            call_ok("regexReplaceAll", vec![json!("a(x*)b"), json!("-ab-axxb-"), json!("${1}W")]),
            json!("-W-xxW-")
        );
    }

    #[test]
    fn test_yaml_json() {
        assert_eq!(
            call_ok("toYaml", vec![json!({"b": [1, 2], "a": "x"})]),
            json!("a: x\nb:\n- 1\n- 2")
        );
        assert_eq!(call_ok("toYaml", vec![json!({})]), json!("{}"));
        assert_eq!(call_ok("toJson", vec![json!({"a": [1]})]), json!(r#"{"a":[1]}"#));
        assert_eq!(call_ok("fromYaml", vec![json!("a: 1")]), json!({"a": 1}));
        assert!(call_ok("fromJson", vec![json!("{bad")])["Error"].is_string());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(call_ok("int", vec![json!("42")]), json!(42));
        assert_eq!(call_ok("int", vec![json!(3.9)]), json!(3));
        assert_eq!(call_ok("float64", vec![json!("1.5")]), json!(1.5));
        assert_eq!(call_ok("atoi", vec![json!("x")]), json!(0));
    }

    #[test]
    fn test_collections() {
        assert_eq!(
            call_ok("dict", vec![json!("a"), json!(1), json!("b")]),
            json!({"a": 1, "b": ""})
        );
        assert_eq!(call_ok("get", vec![json!({"a": 1}), json!("z")]), json!(""));
        assert_eq!(
            call_ok("set", vec![json!({"a": 1}), json!("b"), json!(2)]),
            json!({"a": 1, "b": 2})
        );
        assert_eq!(call_ok("unset", vec![json!({"a": 1}), json!("a")]), json!({}));
        assert_eq!(call_ok("hasKey", vec![json!({"a": 1}), json!("a")]), json!(true));
        assert_eq!(
            call_ok("keys", vec![json!({"b": 1, "a": 2})]),
            json!(["a", "b"])
        );
        assert_eq!(
            call_ok("index", vec![json!({"a": [10, 20]}), json!("a"), json!(1)]),
            json!(20)
        );
        assert!(call("index", vec![json!([1]), json!(5)]).is_err());
        assert_eq!(call_ok("len", vec![json!([1, 2, 3])]), json!(3));
        assert_eq!(call_ok("first", vec![json!([])]), json!(null));
        assert_eq!(call_ok("last", vec![json!([1, 2])]), json!(2));
        assert_eq!(call_ok("append", vec![json!([1]), json!(2)]), json!([1, 2]));
        assert_eq!(call_ok("has", vec![json!(2), json!([1, 2])]), json!(true));
    }

    #[test]
    fn test_merge() {
        let dst = json!({"a": 1, "nested": {"x": 1}});
        let src = json!({"a": 2, "b": 3, "nested": {"x": 2, "y": 2}});
        assert_eq!(
            call_ok("merge", vec![dst.clone(), src.clone()]),
            json!({"a": 1, "b": 3, "nested": {"x": 1, "y": 2}})
        );
        assert_eq!(
            call_ok("mergeOverwrite", vec![dst, src]),
            json!({"a": 2, "b": 3, "nested": {"x": 2, "y": 2}})
        );
    }

    #[test]
    fn test_semver_compare() {
        assert_eq!(
            call_ok("semverCompare", vec![json!(">=1.21-0"), json!("v1.31.0")]),
            json!(true)
        );
        assert_eq!(
            call_ok("semverCompare", vec![json!("<1.19"), json!("v1.28.5-gke.100")]),
            json!(false)
        );
        assert_eq!(
            call_ok("semverCompare", vec![json!(">= 1.20, < 1.25 || >=1.30"), json!("1.31")]),
            json!(true)
        );
    }

    #[test]
    fn test_lookup_is_empty() {
        assert_eq!(
            call_ok("lookup", vec![json!("v1"), json!("Secret"), json!("ns"), json!("name")]),
            json!({})
        );
    }

    #[test]
    fn test_suggest_function() {
        assert_eq!(suggest_function("qoute"), Some("quote"));
        assert_eq!(suggest_function("toyaml"), Some("toYaml"));
        assert_eq!(suggest_function("completelyunknown"), None);
    }
}
