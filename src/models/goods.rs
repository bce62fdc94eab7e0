use serde::Deserialize;

/// The listing fields the inspector sees.
#[derive(Debug, Clone)]
pub struct Goods {
    pub goods_code: String,
    pub goods_name: String,
    pub mobile_goods_name: String,
    pub sale_price: i64,
    pub buy_price: i64,
    pub goods_info: String,
    pub lgroup: Option<String>,
    pub mgroup: Option<String>,
    pub sgroup: Option<String>,
    pub dgroup: Option<String>,
}

/// One record of the daily goods export file. Header names map to fields;
/// columns absent from the file fall back to empty strings.
#[derive(Debug, Deserialize)]
pub struct GoodsRow {
    #[serde(rename = "GOODS_CODE", default)]
    pub goods_code: String,

    #[serde(rename = "GOODS_NAME", default)]
    pub goods_name: String,

    #[serde(rename = "MOBILE_GOODS_NAME", default)]
    pub mobile_goods_name: String,

    #[serde(rename = "SALE_PRICE", default)]
    pub sale_price: String,

    #[serde(rename = "BUY_PRICE", default)]
    pub buy_price: String,

    #[serde(rename = "GOODS_INFO", default)]
    pub goods_info: String,

    #[serde(rename = "IMAGE_HTML", default)]
    pub image_html: String,

    #[serde(rename = "REPRESENTATIVE_FILE", default)]
    pub representative_file: String,

    #[serde(rename = "LGROUP", default)]
    pub lgroup: String,

    #[serde(rename = "LGROUP_NAME", default)]
    pub lgroup_name: String,

    #[serde(rename = "MGROUP", default)]
    pub mgroup: String,

    #[serde(rename = "MGROUP_NAME", default)]
    pub mgroup_name: String,

    #[serde(rename = "SGROUP", default)]
    pub sgroup: String,

    #[serde(rename = "SGROUP_NAME", default)]
    pub sgroup_name: String,

    #[serde(rename = "DGROUP", default)]
    pub dgroup: String,

    #[serde(rename = "DGROUP_NAME", default)]
    pub dgroup_name: String,
}

/// Empty export columns become NULL, not empty strings, so that category
/// filters can tell "unscoped" apart from a real code.
pub fn blank_to_none(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_to_none_treats_whitespace_as_absent() {
        assert_eq!(blank_to_none("  ".into()), None);
        assert_eq!(blank_to_none(String::new()), None);
        assert_eq!(blank_to_none("10".into()), Some("10".into()));
    }
}
