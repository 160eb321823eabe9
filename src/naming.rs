//! Artifact file names.
//!
//! `<v1>_<v2>_..._<product>.<format>` where `v*` are the split values in
//! split-key order, or `all_<product>.<format>` without split keys. Separator
//! and path characters inside a value are percent-escaped so the name stays
//! reversible with [`parse_split_tuple`].
//!
//! Names written without escaping (`2m_temperature_1980_..._<product>.grib`)
//! are not compatible. Once a split value contains `_`, the update planner
//! does not recognise such files and fetches their tuples again under the
//! escaped name.

use crate::expand::SubFilter;

pub const SEPARATOR: &str = "_";
pub const UNSPLIT_TOKEN: &str = "all";

pub fn artifact_name(sub: &SubFilter, product_id: &str) -> String {
    let values = sub.split_values();
    let stem = if values.is_empty() {
        UNSPLIT_TOKEN.to_string()
    } else {
        values
            .iter()
            .map(|value| escape_token(value))
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    };
    format!("{stem}{SEPARATOR}{product_id}.{}", sub.format())
}

/// Recovers the first `count` split values from an artifact file name.
pub fn parse_split_tuple(file_name: &str, count: usize) -> Option<Vec<String>> {
    let tokens: Vec<&str> = file_name.split(SEPARATOR).collect();
    if tokens.len() <= count {
        return None;
    }
    Some(tokens[..count].iter().map(|token| unescape_token(token)).collect())
}

fn escape_token(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace(SEPARATOR, "%5F")
        .replace('/', "%2F")
}

fn unescape_token(token: &str) -> String {
    token
        .replace("%5F", "_")
        .replace("%2F", "/")
        .replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::expand;
    use crate::filter::Filter;
    use std::collections::HashSet;

    fn era5() -> Filter {
        serde_json::from_str(
            r#"{
                "product_type": "reanalysis",
                "format": "grib",
                "variable": ["2m_temperature", "potential_evaporation"],
                "year": ["1980", "1981"],
                "month": ["01", "02"],
                "day": ["01", "02"],
                "time": ["00:00", "01:00"]
            }"#,
        )
        .unwrap()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn unsplit_request_is_named_all() {
        let sub = expand(&era5(), &[]).unwrap().next().unwrap();
        assert_eq!(artifact_name(&sub, "PRODUCT"), "all_PRODUCT.grib");
    }

    #[test]
    fn temporal_split_names() {
        let names: Vec<_> = expand(&era5(), &keys(&["year", "month", "day"]))
            .unwrap()
            .map(|sub| artifact_name(&sub, "reanalysis-era5-single-levels"))
            .collect();
        assert_eq!(names[0], "1980_01_01_reanalysis-era5-single-levels.grib");
        assert_eq!(names[7], "1981_02_02_reanalysis-era5-single-levels.grib");

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
    }

    #[test]
    fn underscores_in_values_round_trip() {
        let split = keys(&["variable", "year"]);
        for sub in expand(&era5(), &split).unwrap() {
            let name = artifact_name(&sub, "reanalysis-era5-single-levels");
            assert_eq!(
                parse_split_tuple(&name, split.len()).unwrap(),
                sub.split_tuple()
            );
        }
    }

    #[test]
    fn names_are_injective() {
        let split = keys(&["variable", "year", "month", "day", "time"]);
        let subs: Vec<_> = expand(&era5(), &split).unwrap().collect();
        let names: HashSet<_> = subs.iter().map(|sub| artifact_name(sub, "p")).collect();
        assert_eq!(names.len(), subs.len());
    }

    #[test]
    fn short_names_do_not_parse() {
        assert_eq!(parse_split_tuple("1980_product.grib", 2), None);
        assert_eq!(
            parse_split_tuple("1980_01_product.grib", 2),
            Some(vec!["1980".to_string(), "01".to_string()])
        );
    }

    #[test]
    fn unescaped_names_do_not_match_their_tuple() {
        let split = keys(&["variable", "year", "month"]);
        let legacy = parse_split_tuple("2m_temperature_1980_01_p.grib", split.len()).unwrap();
        assert_eq!(legacy, keys(&["2m", "temperature", "1980"]));

        let sub = expand(&era5(), &split).unwrap().next().unwrap();
        assert_eq!(artifact_name(&sub, "p"), "2m%5Ftemperature_1980_01_p.grib");
        assert_ne!(legacy, sub.split_tuple());
    }

    #[test]
    fn percent_signs_survive() {
        assert_eq!(unescape_token(&escape_token("a%5F_b/c")), "a%5F_b/c");
    }
}
