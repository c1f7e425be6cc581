//! KDLエントリ → プロパティ値の変換

use crate::error::{FlowError, Result};
use crate::model::{Reference, Settings, Value};
use kdl::{KdlEntry, KdlValue};

/// 型注釈付きエントリを値に変換
///
/// - `(ref)"bucket.arn"` → 参照
/// - `(fmt)"${bucket.arn}/*"` → 文字列連結
/// - `(setting)"domain_names"` → ステージ設定値
/// - 注釈なし → リテラル
pub fn entry_value(entry: &KdlEntry, settings: &Settings, stage: Option<&str>) -> Result<Value> {
    let annotation = entry.ty().map(|t| t.value());
    match annotation {
        None => Ok(Value::Literal(kdl_to_json(entry.value()))),
        Some(ty) => {
            let text = entry.value().as_string().ok_or_else(|| {
                FlowError::InvalidConfig(format!("({ty}) には文字列を指定してください"))
            })?;
            match ty {
                "ref" => Reference::parse(text).map(Value::Reference).ok_or_else(|| {
                    FlowError::InvalidConfig(format!("無効な参照です: '{text}'"))
                }),
                "fmt" => parse_interpolation(text),
                "setting" => settings
                    .get(text)
                    .cloned()
                    .map(Value::Literal)
                    .ok_or_else(|| FlowError::MissingSetting {
                        name: text.to_string(),
                        stage: stage.map(str::to_string),
                    }),
                other => Err(FlowError::InvalidConfig(format!(
                    "未対応の型注釈です: ({other})"
                ))),
            }
        }
    }
}

/// KDLの値をJSONに変換
pub fn kdl_to_json(value: &KdlValue) -> serde_json::Value {
    match value {
        KdlValue::String(s) => serde_json::Value::String(s.clone()),
        KdlValue::Integer(i) => i64::try_from(*i)
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(i.to_string())),
        KdlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        KdlValue::Bool(b) => serde_json::Value::Bool(*b),
        KdlValue::Null => serde_json::Value::Null,
    }
}

/// `${id.attr}` プレースホルダーを含む文字列をパース
pub fn parse_interpolation(text: &str) -> Result<Value> {
    let mut parts = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        if start > 0 {
            parts.push(Value::literal(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            FlowError::InvalidConfig(format!("'${{' が閉じられていません: '{text}'"))
        })?;
        let reference = Reference::parse(&after[..end]).ok_or_else(|| {
            FlowError::InvalidConfig(format!("無効な参照です: '{}'", &after[..end]))
        })?;
        parts.push(Value::Reference(reference));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        parts.push(Value::literal(rest));
    }

    Ok(Value::Interpolate(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interpolation() {
        let value = parse_interpolation("${site.arn}/*").unwrap();
        assert_eq!(
            value,
            Value::Interpolate(vec![
                Value::reference("site", "arn"),
                Value::literal("/*"),
            ])
        );
    }

    #[test]
    fn test_parse_interpolation_plain_text() {
        let value = parse_interpolation("no placeholders").unwrap();
        assert_eq!(value, Value::Interpolate(vec![Value::literal("no placeholders")]));
    }

    #[test]
    fn test_parse_interpolation_unclosed() {
        assert!(parse_interpolation("${site.arn/*").is_err());
    }

    #[test]
    fn test_kdl_to_json() {
        assert_eq!(kdl_to_json(&KdlValue::Integer(512)), serde_json::json!(512));
        assert_eq!(kdl_to_json(&KdlValue::Bool(false)), serde_json::json!(false));
        assert_eq!(kdl_to_json(&KdlValue::Null), serde_json::Value::Null);
    }
}
