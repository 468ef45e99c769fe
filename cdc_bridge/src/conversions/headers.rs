use std::collections::HashMap;

use bytes::Bytes;

/// A header value as handed over by the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawHeader {
    Bytes(Bytes),
    List(Vec<Bytes>),
}

impl RawHeader {
    pub fn decode(&self) -> String {
        match self {
            RawHeader::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            RawHeader::List(values) => values
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Header name to decoded value. `None` marks a header that was sent without a value.
pub type Headers = HashMap<String, Option<String>>;

pub fn normalize_headers(headers: &[(String, Option<RawHeader>)]) -> Headers {
    headers
        .iter()
        .map(|(name, value)| (name.clone(), value.as_ref().map(RawHeader::decode)))
        .collect()
}

/// Folds a flat list of record headers, where a name may repeat, into one
/// entry per name. Repeated values become a [`RawHeader::List`] in record order.
pub fn group_header_entries<'a, I>(entries: I) -> Vec<(String, Option<RawHeader>)>
where
    I: IntoIterator<Item = (&'a str, Option<&'a [u8]>)>,
{
    let mut grouped: Vec<(String, Vec<Bytes>)> = Vec::new();

    for (name, value) in entries {
        let idx = match grouped.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                grouped.push((name.to_string(), Vec::new()));
                grouped.len() - 1
            }
        };
        let slot = &mut grouped[idx].1;
        if let Some(value) = value {
            slot.push(Bytes::copy_from_slice(value));
        }
    }

    grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = match values.len() {
                0 => None,
                1 => values.pop().map(RawHeader::Bytes),
                _ => Some(RawHeader::List(values)),
            };
            (name, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_each_form() {
        let headers = vec![
            ("absent".to_string(), None),
            ("single".to_string(), Some(RawHeader::Bytes(Bytes::from_static(b"abc")))),
            (
                "one-element".to_string(),
                Some(RawHeader::List(vec![Bytes::from_static(b"only")])),
            ),
            (
                "many".to_string(),
                Some(RawHeader::List(vec![
                    Bytes::from_static(b"a"),
                    Bytes::from_static(b"b"),
                    Bytes::from_static(b"c"),
                ])),
            ),
        ];

        let normalized = normalize_headers(&headers);

        assert_eq!(normalized.len(), 4);
        assert_eq!(normalized["absent"], None);
        assert_eq!(normalized["single"].as_deref(), Some("abc"));
        assert_eq!(normalized["one-element"].as_deref(), Some("only"));
        assert_eq!(normalized["many"].as_deref(), Some("a,b,c"));
    }

    #[test]
    fn values_are_not_interpreted() {
        let headers = vec![(
            "json".to_string(),
            Some(RawHeader::Bytes(Bytes::from_static(br#"{"a": 1}"#))),
        )];
        assert_eq!(
            normalize_headers(&headers)["json"].as_deref(),
            Some(r#"{"a": 1}"#)
        );
    }

    #[test]
    fn groups_repeated_names() {
        let entries: Vec<(&str, Option<&[u8]>)> = vec![
            ("trace", Some(&b"t1"[..])),
            ("empty", None),
            ("trace", Some(&b"t2"[..])),
            ("id", Some(&b"42"[..])),
        ];

        let grouped = group_header_entries(entries);

        assert_eq!(
            grouped,
            vec![
                (
                    "trace".to_string(),
                    Some(RawHeader::List(vec![
                        Bytes::from_static(b"t1"),
                        Bytes::from_static(b"t2"),
                    ]))
                ),
                ("empty".to_string(), None),
                ("id".to_string(), Some(RawHeader::Bytes(Bytes::from_static(b"42")))),
            ]
        );
        assert_eq!(normalize_headers(&grouped)["trace"].as_deref(), Some("t1,t2"));
    }
}
