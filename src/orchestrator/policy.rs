/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use serde::Serialize;
use std::collections::BTreeMap;

const POLICY_VERSION: &str = "2012-10-17";

/// An IAM policy document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<StatementEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatementEntry {
    pub effect: String,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Vec<String>>,
}

/// Lets EC2 instances assume the role.
pub fn assume_role_policy() -> anyhow::Result<String> {
    let doc = PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: vec![StatementEntry {
            effect: "Allow".to_string(),
            action: vec!["sts:AssumeRole".to_string()],
            principal: Some(BTreeMap::from([(
                "Service".to_string(),
                vec!["ec2.amazonaws.com".to_string()],
            )])),
            resource: None,
        }],
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Read and list access to exactly one bucket.
pub fn bucket_read_policy(bucket: &str) -> anyhow::Result<String> {
    let doc = PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: vec![StatementEntry {
            effect: "Allow".to_string(),
            action: vec!["s3:GetObject".to_string(), "s3:ListBucket".to_string()],
            principal: None,
            resource: Some(vec![
                format!("arn:aws:s3:::{bucket}/*"),
                format!("arn:aws:s3:::{bucket}"),
            ]),
        }],
    };
    Ok(serde_json::to_string(&doc)?)
}
