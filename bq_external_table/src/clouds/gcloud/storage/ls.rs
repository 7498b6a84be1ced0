//! Listing objects in Google Cloud Storage.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{
    super::{percent_encode, Client},
    StorageObject,
};
use crate::common::*;

/// URL query parameters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery<'a> {
    prefix: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

/// Response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    next_page_token: Option<String>,

    #[serde(default)]
    items: Vec<StorageObject>,
}

/// List every object in `bucket` whose name starts with `prefix`.
///
/// Unlike a file system, this is a plain string prefix match: `"data"` matches
/// both `data/a.csv` and `data-old.csv`. Objects come back in the order Cloud
/// Storage returns them, which is lexicographic by name. See the
/// [documentation][list].
///
/// [list]: https://cloud.google.com/storage/docs/json_api/v1/objects/list
#[instrument(level = "trace", skip(client))]
pub(crate) async fn ls(
    client: &Client,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<StorageObject>> {
    debug!("listing gs://{}/{}", bucket, prefix);
    let req_url = format!(
        "https://storage.googleapis.com/storage/v1/b/{}/o",
        percent_encode(bucket),
    );

    let mut seen = HashSet::new();
    let mut objects = vec![];
    let mut page_token = None;
    loop {
        let query = ListQuery { prefix, page_token };
        let mut res = client
            .get::<ListResponse, _, _>(&req_url, query)
            .await
            .with_context(|| format!("could not list gs://{}/", bucket))?;
        page_token = res.next_page_token.take();

        for item in res.items {
            // Filter out duplicate items, which can show up across pages.
            if !seen.insert(item.name.clone()) {
                continue;
            }
            trace!("found {}", item.to_url_string());
            objects.push(item);
        }

        if page_token.is_none() {
            break;
        }
    }
    Ok(objects)
}

#[test]
fn list_query_uses_page_token() {
    let query = ListQuery {
        prefix: "users/",
        page_token: Some("abc".to_owned()),
    };
    assert_eq!(
        serde_urlencoded::to_string(&query).unwrap(),
        "prefix=users%2F&pageToken=abc",
    );
    let query = ListQuery {
        prefix: "",
        page_token: None,
    };
    assert_eq!(serde_urlencoded::to_string(&query).unwrap(), "prefix=");
}

#[test]
fn list_response_may_omit_items() {
    let res = serde_json::from_str::<ListResponse>(r#"{"kind": "storage#objects"}"#)
        .unwrap();
    assert!(res.items.is_empty());
    assert!(res.next_page_token.is_none());
}
