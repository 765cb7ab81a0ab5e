/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod aws;

use async_trait::async_trait;
use std::fmt;

pub use aws::AwsCloud;

/// Everything needed to launch one benchmark instance into a provisioned stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRequest {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub key_name: String,
    pub instance_profile_name: String,
    pub root_volume_gib: i32,
}

/// Instance and system status checks of a running instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceHealth {
    pub instance_ok: bool,
    pub system_ok: bool,
}
impl InstanceHealth {
    pub fn is_healthy(&self) -> bool {
        self.instance_ok && self.system_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown(String),
}
impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Pending => f.write_str("pending"),
            InstanceState::Running => f.write_str("running"),
            InstanceState::ShuttingDown => f.write_str("shutting-down"),
            InstanceState::Terminated => f.write_str("terminated"),
            InstanceState::Stopping => f.write_str("stopping"),
            InstanceState::Stopped => f.write_str("stopped"),
            InstanceState::Unknown(state) => f.write_str(state),
        }
    }
}

/// The cloud control plane calls the provisioner and the instance lifecycle need. Every call is
/// a single request, retrying is up to the caller.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// The region every call is made against.
    fn region(&self) -> &str;

    // network
    async fn create_vpc(&self, cidr: &str, name: &str) -> anyhow::Result<String>;
    async fn enable_vpc_dns_support(&self, vpc_id: &str) -> anyhow::Result<()>;
    async fn enable_vpc_dns_hostnames(&self, vpc_id: &str) -> anyhow::Result<()>;
    async fn create_subnet(&self, vpc_id: &str, cidr: &str) -> anyhow::Result<String>;
    async fn create_internet_gateway(&self) -> anyhow::Result<String>;
    async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> anyhow::Result<()>;
    async fn main_route_table(&self, vpc_id: &str) -> anyhow::Result<String>;
    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        igw_id: &str,
    ) -> anyhow::Result<()>;
    async fn create_storage_endpoint(
        &self,
        vpc_id: &str,
        route_table_id: &str,
        service_name: &str,
    ) -> anyhow::Result<String>;
    /// Prefix lists referenced as the destination of any route in the table.
    async fn route_prefix_list_ids(&self, route_table_id: &str) -> anyhow::Result<Vec<String>>;
    async fn prefix_list_cidrs(&self, prefix_list_id: &str) -> anyhow::Result<Vec<String>>;

    // access control
    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> anyhow::Result<String>;
    async fn authorize_ssh_ingress(&self, group_id: &str) -> anyhow::Result<()>;

    // identity
    async fn create_role(&self, name: &str, assume_role_policy: &str) -> anyhow::Result<()>;
    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy: &str,
    ) -> anyhow::Result<()>;
    async fn create_instance_profile(&self, name: &str) -> anyhow::Result<()>;
    async fn add_role_to_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> anyhow::Result<()>;

    /// Returns the PEM encoded private key.
    async fn create_key_pair(&self, name: &str) -> anyhow::Result<String>;

    // teardown
    async fn delete_key_pair(&self, name: &str) -> anyhow::Result<()>;
    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> anyhow::Result<()>;
    async fn delete_instance_profile(&self, name: &str) -> anyhow::Result<()>;
    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> anyhow::Result<()>;
    async fn delete_role(&self, name: &str) -> anyhow::Result<()>;
    async fn delete_security_group(&self, group_id: &str) -> anyhow::Result<()>;
    async fn delete_vpc_endpoint(&self, endpoint_id: &str) -> anyhow::Result<()>;
    async fn delete_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
    ) -> anyhow::Result<()>;
    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> anyhow::Result<()>;
    async fn delete_internet_gateway(&self, igw_id: &str) -> anyhow::Result<()>;
    async fn delete_subnet(&self, subnet_id: &str) -> anyhow::Result<()>;
    async fn delete_vpc(&self, vpc_id: &str) -> anyhow::Result<()>;

    // instances
    /// Baseline bandwidth of the first network card in Gbps.
    async fn instance_type_bandwidth_gbps(&self, instance_type: &str) -> anyhow::Result<f64>;
    async fn run_instance(&self, request: &InstanceRequest) -> anyhow::Result<String>;
    async fn instance_health(&self, instance_id: &str) -> anyhow::Result<InstanceHealth>;
    async fn instance_public_ip(&self, instance_id: &str) -> anyhow::Result<Option<String>>;
    async fn instance_state(&self, instance_id: &str) -> anyhow::Result<InstanceState>;
    async fn terminate_instance(&self, instance_id: &str) -> anyhow::Result<()>;
}
