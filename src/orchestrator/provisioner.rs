/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::policy;
use crate::{cloud::CloudApi, prefix::Ipv4Prefix, target::PrivateKey};
use anyhow::{anyhow, Context};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info};

const VPC_CIDR: &str = "10.0.0.0/16";
const SUBNET_CIDR: &str = "10.0.0.0/16";
const DEFAULT_ROUTE: &str = "0.0.0.0/0";
const ROLE_POLICY_NAME: &str = "inline";

const NAME_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

pub fn random_name() -> String {
    format!("s3bench-{}", nanoid::nanoid!(8, &NAME_ALPHABET))
}

/// Cloud resources created by one provisioning run. A field is only set once the resource it
/// names exists, so a stack that failed half way can still be torn down.
#[derive(Debug, Clone, Default)]
pub struct ResourceStack {
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
    pub internet_gateway_id: Option<String>,
    pub internet_gateway_attached: bool,
    pub route_table_id: Option<String>,
    pub default_route_created: bool,
    pub endpoint_id: Option<String>,
    pub storage_prefixes: Arc<Vec<Ipv4Prefix>>,
    pub security_group_id: Option<String>,
    pub role_name: Option<String>,
    pub role_policy_name: Option<String>,
    pub instance_profile_name: Option<String>,
    pub role_added_to_profile: bool,
    pub key_name: Option<String>,
    pub private_key: Option<PrivateKey>,
}
impl ResourceStack {
    /// What instances need to launch into this stack. Fails unless every resource exists.
    pub fn handle(&self) -> anyhow::Result<StackHandle> {
        let missing = |what: &str| anyhow!("resource stack has no {what}");
        Ok(StackHandle {
            subnet_id: self.subnet_id.clone().ok_or_else(|| missing("subnet"))?,
            security_group_id: self
                .security_group_id
                .clone()
                .ok_or_else(|| missing("security group"))?,
            instance_profile_name: self
                .instance_profile_name
                .clone()
                .filter(|_| self.role_added_to_profile)
                .ok_or_else(|| missing("instance profile"))?,
            key_name: self.key_name.clone().ok_or_else(|| missing("key pair"))?,
            private_key: self
                .private_key
                .clone()
                .ok_or_else(|| missing("private key"))?,
            storage_prefixes: self.storage_prefixes.clone(),
        })
    }
}

/// The parts of a complete [`ResourceStack`] shared read-only by every job.
#[derive(Debug, Clone)]
pub struct StackHandle {
    pub subnet_id: String,
    pub security_group_id: String,
    pub instance_profile_name: String,
    pub key_name: String,
    pub private_key: PrivateKey,
    pub storage_prefixes: Arc<Vec<Ipv4Prefix>>,
}

/// Creates and destroys the network and identity resources benchmark instances run in.
pub struct Provisioner {
    cloud: Arc<dyn CloudApi>,
    bucket: String,
    iam_propagation_delay: Duration,
    stack: Option<ResourceStack>,
}
impl Provisioner {
    pub fn new(cloud: Arc<dyn CloudApi>, bucket: &str, iam_propagation_delay: Duration) -> Self {
        Self {
            cloud,
            bucket: bucket.to_string(),
            iam_propagation_delay,
            stack: None,
        }
    }

    pub fn stack(&self) -> Option<&ResourceStack> {
        self.stack.as_ref()
    }

    /// Creates the whole stack. Any failure aborts, leaving whatever was already created in
    /// place for [`Provisioner::tear_down`].
    pub async fn set_up(&mut self) -> anyhow::Result<StackHandle> {
        if self.stack.is_some() {
            return Err(anyhow!(
                "a resource stack is already live, tear it down first"
            ));
        }

        let stack = self.stack.insert(ResourceStack::default());
        create_stack(self.cloud.as_ref(), &self.bucket, stack).await?;

        // IAM is eventually consistent, an instance profile used right away is often rejected
        debug!(
            "Waiting {}s for IAM changes to propagate",
            self.iam_propagation_delay.as_secs()
        );
        tokio::time::sleep(self.iam_propagation_delay).await;

        info!("Resource stack is ready");
        stack.handle()
    }

    /// Deletes every resource that exists, in reverse order of creation. Failures are logged and
    /// the remaining resources are still deleted.
    pub async fn tear_down(&mut self) {
        let Some(stack) = self.stack.take() else {
            return;
        };
        let cloud = self.cloud.as_ref();

        if let Some(key_name) = &stack.key_name {
            log_deletion("key pair", key_name, cloud.delete_key_pair(key_name).await);
        }

        if let Some(profile) = &stack.instance_profile_name {
            if let (true, Some(role)) = (stack.role_added_to_profile, &stack.role_name) {
                log_deletion(
                    "role from instance profile",
                    profile,
                    cloud.remove_role_from_instance_profile(profile, role).await,
                );
            }
            log_deletion(
                "instance profile",
                profile,
                cloud.delete_instance_profile(profile).await,
            );
        }

        if let Some(role) = &stack.role_name {
            if let Some(policy) = &stack.role_policy_name {
                log_deletion(
                    "role policy",
                    policy,
                    cloud.delete_role_policy(role, policy).await,
                );
            }
            log_deletion("role", role, cloud.delete_role(role).await);
        }

        if let Some(group) = &stack.security_group_id {
            log_deletion(
                "security group",
                group,
                cloud.delete_security_group(group).await,
            );
        }

        if let Some(endpoint) = &stack.endpoint_id {
            log_deletion(
                "VPC endpoint",
                endpoint,
                cloud.delete_vpc_endpoint(endpoint).await,
            );
        }

        if let (true, Some(route_table)) = (stack.default_route_created, &stack.route_table_id) {
            log_deletion(
                "default route",
                route_table,
                cloud.delete_route(route_table, DEFAULT_ROUTE).await,
            );
        }

        if let Some(igw) = &stack.internet_gateway_id {
            if let (true, Some(vpc)) = (stack.internet_gateway_attached, &stack.vpc_id) {
                log_deletion(
                    "internet gateway attachment",
                    igw,
                    cloud.detach_internet_gateway(igw, vpc).await,
                );
            }
            log_deletion(
                "internet gateway",
                igw,
                cloud.delete_internet_gateway(igw).await,
            );
        }

        if let Some(subnet) = &stack.subnet_id {
            log_deletion("subnet", subnet, cloud.delete_subnet(subnet).await);
        }

        if let Some(vpc) = &stack.vpc_id {
            log_deletion("VPC", vpc, cloud.delete_vpc(vpc).await);
        }

        info!("Resource stack torn down");
    }
}

fn log_deletion(what: &str, id: &str, result: anyhow::Result<()>) {
    match result {
        Ok(()) => debug!("Deleted {what} {id}"),
        Err(err) => error!("Unable to delete {what} {id}: {err:#}"),
    }
}

async fn create_stack(
    cloud: &dyn CloudApi,
    bucket: &str,
    stack: &mut ResourceStack,
) -> anyhow::Result<()> {
    // network
    let vpc = cloud
        .create_vpc(VPC_CIDR, &random_name())
        .await
        .context("creating VPC failed")?;
    stack.vpc_id = Some(vpc.clone());
    debug!("Created VPC {vpc}");

    // the API takes one attribute per call
    cloud
        .enable_vpc_dns_support(&vpc)
        .await
        .context("enabling VPC DNS support failed")?;
    cloud
        .enable_vpc_dns_hostnames(&vpc)
        .await
        .context("enabling VPC DNS hostnames failed")?;

    let subnet = cloud
        .create_subnet(&vpc, SUBNET_CIDR)
        .await
        .context("creating subnet failed")?;
    stack.subnet_id = Some(subnet.clone());
    debug!("Created subnet {subnet}");

    let igw = cloud
        .create_internet_gateway()
        .await
        .context("creating internet gateway failed")?;
    stack.internet_gateway_id = Some(igw.clone());
    cloud
        .attach_internet_gateway(&igw, &vpc)
        .await
        .context("attaching internet gateway failed")?;
    stack.internet_gateway_attached = true;
    debug!("Created and attached internet gateway {igw}");

    let route_table = cloud
        .main_route_table(&vpc)
        .await
        .context("finding the main route table failed")?;
    stack.route_table_id = Some(route_table.clone());

    cloud
        .create_route(&route_table, DEFAULT_ROUTE, &igw)
        .await
        .context("creating default route failed")?;
    stack.default_route_created = true;

    let service_name = format!("com.amazonaws.{}.s3", cloud.region());
    let endpoint = cloud
        .create_storage_endpoint(&vpc, &route_table, &service_name)
        .await
        .context("creating S3 gateway endpoint failed")?;
    stack.endpoint_id = Some(endpoint.clone());
    debug!("Created S3 gateway endpoint {endpoint}");

    stack.storage_prefixes = Arc::new(storage_prefixes(cloud, &route_table).await?);
    debug!(
        "S3 is reachable through {} prefixes",
        stack.storage_prefixes.len()
    );

    // access control
    let group_name = random_name();
    let group = cloud
        .create_security_group(&vpc, &group_name, &group_name)
        .await
        .context("creating security group failed")?;
    stack.security_group_id = Some(group.clone());
    cloud
        .authorize_ssh_ingress(&group)
        .await
        .context("allowing SSH into the security group failed")?;
    debug!("Created security group {group}");

    // identity
    let role = random_name();
    cloud
        .create_role(&role, &policy::assume_role_policy()?)
        .await
        .context("creating role failed")?;
    stack.role_name = Some(role.clone());

    let role_policy = policy::bucket_read_policy(bucket)?;
    cloud
        .put_role_policy(&role, ROLE_POLICY_NAME, &role_policy)
        .await
        .context("attaching role policy failed")?;
    stack.role_policy_name = Some(ROLE_POLICY_NAME.to_string());

    let profile = random_name();
    cloud
        .create_instance_profile(&profile)
        .await
        .context("creating instance profile failed")?;
    stack.instance_profile_name = Some(profile.clone());

    cloud
        .add_role_to_instance_profile(&profile, &role)
        .await
        .context("adding role to instance profile failed")?;
    stack.role_added_to_profile = true;
    debug!("Created role {role} and instance profile {profile}");

    let key_name = random_name();
    let pem = cloud
        .create_key_pair(&key_name)
        .await
        .context("creating key pair failed")?;
    stack.key_name = Some(key_name);
    stack.private_key = Some(PrivateKey::parse(&pem).context("parsing private key failed")?);

    Ok(())
}

/// Resolves the prefix lists the S3 endpoint added to the route table.
async fn storage_prefixes(
    cloud: &dyn CloudApi,
    route_table: &str,
) -> anyhow::Result<Vec<Ipv4Prefix>> {
    let prefix_lists = cloud
        .route_prefix_list_ids(route_table)
        .await
        .context("reading back the route table failed")?;
    if prefix_lists.is_empty() {
        return Err(anyhow!(
            "route table {route_table} has no prefix list route for the S3 endpoint"
        ));
    }

    let mut prefixes = vec![];
    for prefix_list in prefix_lists {
        let cidrs = cloud
            .prefix_list_cidrs(&prefix_list)
            .await
            .context(format!("reading prefix list {prefix_list} failed"))?;
        for cidr in cidrs {
            prefixes.push(
                cidr.parse::<Ipv4Prefix>()
                    .context(format!("prefix list {prefix_list} has an invalid entry"))?,
            );
        }
    }
    Ok(prefixes)
}
