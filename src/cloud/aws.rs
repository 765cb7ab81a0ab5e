/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{CloudApi, InstanceHealth, InstanceRequest, InstanceState};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_ec2::{
    error::DisplayErrorContext,
    types::{
        AttributeBooleanValue, BlockDeviceMapping, EbsBlockDevice, Filter,
        IamInstanceProfileSpecification, InstanceNetworkInterfaceSpecification, InstanceStateName,
        InstanceType, IpPermission, IpRange, KeyFormat, KeyType, ResourceType, SummaryStatus, Tag,
        TagSpecification, VolumeType, VpcEndpointType,
    },
};
use tracing::debug;

const ROOT_DEVICE: &str = "/dev/sda1";
const ROOT_VOLUME_IOPS: i32 = 16000;
const ROOT_VOLUME_THROUGHPUT_MBPS: i32 = 1000;
const MAX_ROLE_SESSION_SECS: i32 = 12 * 60 * 60;

fn sdk_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> anyhow::Error {
    anyhow!("{}", DisplayErrorContext(err))
}

fn name_tag(resource_type: ResourceType, name: &str) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .tags(Tag::builder().key("Name").value(name).build())
        .build()
}

/// [`CloudApi`] on top of the EC2 and IAM SDK clients.
#[derive(Debug, Clone)]
pub struct AwsCloud {
    ec2: aws_sdk_ec2::Client,
    iam: aws_sdk_iam::Client,
    region: String,
}
impl AwsCloud {
    /// Loads credentials and region from the environment. An explicit `region` overrides
    /// whatever the default provider chain resolves.
    pub async fn from_env(region: Option<String>) -> anyhow::Result<Self> {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;

        let region = config
            .region()
            .map(|region| region.to_string())
            .context("No AWS region configured, set `region` in the config or AWS_REGION")?;
        debug!("Using AWS region {region}");

        Ok(Self {
            ec2: aws_sdk_ec2::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
            region,
        })
    }
}

#[async_trait]
impl CloudApi for AwsCloud {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_vpc(&self, cidr: &str, name: &str) -> anyhow::Result<String> {
        let out = self
            .ec2
            .create_vpc()
            .cidr_block(cidr)
            .tag_specifications(name_tag(ResourceType::Vpc, name))
            .send()
            .await
            .map_err(sdk_error)?;
        out.vpc()
            .and_then(|vpc| vpc.vpc_id())
            .map(str::to_string)
            .context("CreateVpc returned no VPC ID")
    }

    async fn enable_vpc_dns_support(&self, vpc_id: &str) -> anyhow::Result<()> {
        self.ec2
            .modify_vpc_attribute()
            .vpc_id(vpc_id)
            .enable_dns_support(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn enable_vpc_dns_hostnames(&self, vpc_id: &str) -> anyhow::Result<()> {
        self.ec2
            .modify_vpc_attribute()
            .vpc_id(vpc_id)
            .enable_dns_hostnames(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn create_subnet(&self, vpc_id: &str, cidr: &str) -> anyhow::Result<String> {
        let out = self
            .ec2
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr)
            .send()
            .await
            .map_err(sdk_error)?;
        out.subnet()
            .and_then(|subnet| subnet.subnet_id())
            .map(str::to_string)
            .context("CreateSubnet returned no subnet ID")
    }

    async fn create_internet_gateway(&self) -> anyhow::Result<String> {
        let out = self
            .ec2
            .create_internet_gateway()
            .send()
            .await
            .map_err(sdk_error)?;
        out.internet_gateway()
            .and_then(|igw| igw.internet_gateway_id())
            .map(str::to_string)
            .context("CreateInternetGateway returned no gateway ID")
    }

    async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> anyhow::Result<()> {
        self.ec2
            .attach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn main_route_table(&self, vpc_id: &str) -> anyhow::Result<String> {
        let out = self
            .ec2
            .describe_route_tables()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(
                Filter::builder()
                    .name("association.main")
                    .values("true")
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;

        let tables = out.route_tables();
        match tables {
            [table] => table
                .route_table_id()
                .map(str::to_string)
                .context("route table has no ID"),
            _ => Err(anyhow!(
                "expected exactly one main route table for {vpc_id}, found {}",
                tables.len()
            )),
        }
    }

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        igw_id: &str,
    ) -> anyhow::Result<()> {
        self.ec2
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination_cidr)
            .gateway_id(igw_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn create_storage_endpoint(
        &self,
        vpc_id: &str,
        route_table_id: &str,
        service_name: &str,
    ) -> anyhow::Result<String> {
        let out = self
            .ec2
            .create_vpc_endpoint()
            .vpc_id(vpc_id)
            .service_name(service_name)
            .vpc_endpoint_type(VpcEndpointType::Gateway)
            .route_table_ids(route_table_id)
            .send()
            .await
            .map_err(sdk_error)?;
        out.vpc_endpoint()
            .and_then(|endpoint| endpoint.vpc_endpoint_id())
            .map(str::to_string)
            .context("CreateVpcEndpoint returned no endpoint ID")
    }

    async fn route_prefix_list_ids(&self, route_table_id: &str) -> anyhow::Result<Vec<String>> {
        let out = self
            .ec2
            .describe_route_tables()
            .route_table_ids(route_table_id)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(out
            .route_tables()
            .iter()
            .flat_map(|table| table.routes())
            .filter_map(|route| route.destination_prefix_list_id())
            .map(str::to_string)
            .collect())
    }

    async fn prefix_list_cidrs(&self, prefix_list_id: &str) -> anyhow::Result<Vec<String>> {
        let mut cidrs = vec![];
        let mut next_token = None;
        loop {
            let out = self
                .ec2
                .get_managed_prefix_list_entries()
                .prefix_list_id(prefix_list_id)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(sdk_error)?;

            cidrs.extend(
                out.entries()
                    .iter()
                    .filter_map(|entry| entry.cidr())
                    .map(str::to_string),
            );

            match out.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(cidrs)
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> anyhow::Result<String> {
        let out = self
            .ec2
            .create_security_group()
            .vpc_id(vpc_id)
            .group_name(name)
            .description(description)
            .send()
            .await
            .map_err(sdk_error)?;
        out.group_id()
            .map(str::to_string)
            .context("CreateSecurityGroup returned no group ID")
    }

    async fn authorize_ssh_ingress(&self, group_id: &str) -> anyhow::Result<()> {
        self.ec2
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(
                IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(22)
                    .to_port(22)
                    .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn create_role(&self, name: &str, assume_role_policy: &str) -> anyhow::Result<()> {
        self.iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(assume_role_policy)
            .max_session_duration(MAX_ROLE_SESSION_SECS)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy: &str,
    ) -> anyhow::Result<()> {
        self.iam
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(policy)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn create_instance_profile(&self, name: &str) -> anyhow::Result<()> {
        self.iam
            .create_instance_profile()
            .instance_profile_name(name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn add_role_to_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> anyhow::Result<()> {
        self.iam
            .add_role_to_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn create_key_pair(&self, name: &str) -> anyhow::Result<String> {
        let out = self
            .ec2
            .create_key_pair()
            .key_name(name)
            .key_type(KeyType::Ed25519)
            .key_format(KeyFormat::Pem)
            .send()
            .await
            .map_err(sdk_error)?;
        out.key_material()
            .map(str::to_string)
            .context("CreateKeyPair returned no key material")
    }

    async fn delete_key_pair(&self, name: &str) -> anyhow::Result<()> {
        self.ec2
            .delete_key_pair()
            .key_name(name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> anyhow::Result<()> {
        self.iam
            .remove_role_from_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_instance_profile(&self, name: &str) -> anyhow::Result<()> {
        self.iam
            .delete_instance_profile()
            .instance_profile_name(name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> anyhow::Result<()> {
        self.iam
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> anyhow::Result<()> {
        self.iam
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> anyhow::Result<()> {
        self.ec2
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_vpc_endpoint(&self, endpoint_id: &str) -> anyhow::Result<()> {
        let out = self
            .ec2
            .delete_vpc_endpoints()
            .vpc_endpoint_ids(endpoint_id)
            .send()
            .await
            .map_err(sdk_error)?;

        match out.unsuccessful().first() {
            None => Ok(()),
            Some(item) => Err(anyhow!(
                "unable to delete VPC endpoint {endpoint_id}: {}",
                item.error()
                    .and_then(|err| err.message())
                    .unwrap_or("unknown error")
            )),
        }
    }

    async fn delete_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
    ) -> anyhow::Result<()> {
        self.ec2
            .delete_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination_cidr)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> anyhow::Result<()> {
        self.ec2
            .detach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, igw_id: &str) -> anyhow::Result<()> {
        self.ec2
            .delete_internet_gateway()
            .internet_gateway_id(igw_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> anyhow::Result<()> {
        self.ec2
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_vpc(&self, vpc_id: &str) -> anyhow::Result<()> {
        self.ec2
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn instance_type_bandwidth_gbps(&self, instance_type: &str) -> anyhow::Result<f64> {
        let out = self
            .ec2
            .describe_instance_types()
            .instance_types(InstanceType::from(instance_type))
            .send()
            .await
            .map_err(sdk_error)?;

        out.instance_types()
            .first()
            .and_then(|info| info.network_info())
            .and_then(|network| network.network_cards().first())
            .and_then(|card| card.baseline_bandwidth_in_gbps())
            .context(format!("no baseline bandwidth known for {instance_type}"))
    }

    async fn run_instance(&self, request: &InstanceRequest) -> anyhow::Result<String> {
        let root_volume = EbsBlockDevice::builder()
            .volume_size(request.root_volume_gib)
            .volume_type(VolumeType::Gp3)
            .iops(ROOT_VOLUME_IOPS)
            .throughput(ROOT_VOLUME_THROUGHPUT_MBPS)
            .encrypted(true)
            .delete_on_termination(true)
            .build();

        let out = self
            .ec2
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .key_name(&request.key_name)
            .iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(&request.instance_profile_name)
                    .build(),
            )
            .network_interfaces(
                InstanceNetworkInterfaceSpecification::builder()
                    .device_index(0)
                    .subnet_id(&request.subnet_id)
                    .groups(&request.security_group_id)
                    .associate_public_ip_address(true)
                    .delete_on_termination(true)
                    .build(),
            )
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(ROOT_DEVICE)
                    .ebs(root_volume)
                    .build(),
            )
            .tag_specifications(name_tag(ResourceType::Instance, &request.name))
            .send()
            .await
            .map_err(sdk_error)?;

        out.instances()
            .first()
            .and_then(|instance| instance.instance_id())
            .map(str::to_string)
            .context("RunInstances returned no instance ID")
    }

    async fn instance_health(&self, instance_id: &str) -> anyhow::Result<InstanceHealth> {
        let out = self
            .ec2
            .describe_instance_status()
            .instance_ids(instance_id)
            .include_all_instances(true)
            .send()
            .await
            .map_err(sdk_error)?;

        let status = out
            .instance_statuses()
            .first()
            .context(format!("no status reported for {instance_id}"))?;
        let ok = |summary: Option<&SummaryStatus>| summary == Some(&SummaryStatus::Ok);

        Ok(InstanceHealth {
            instance_ok: ok(status.instance_status().and_then(|s| s.status())),
            system_ok: ok(status.system_status().and_then(|s| s.status())),
        })
    }

    async fn instance_public_ip(&self, instance_id: &str) -> anyhow::Result<Option<String>> {
        let out = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(out
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .find_map(|instance| instance.public_ip_address())
            .map(str::to_string))
    }

    async fn instance_state(&self, instance_id: &str) -> anyhow::Result<InstanceState> {
        let out = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(sdk_error)?;

        let name = out
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .find_map(|instance| instance.state().and_then(|state| state.name()))
            .context(format!("no state reported for {instance_id}"))?;

        Ok(match name {
            InstanceStateName::Pending => InstanceState::Pending,
            InstanceStateName::Running => InstanceState::Running,
            InstanceStateName::ShuttingDown => InstanceState::ShuttingDown,
            InstanceStateName::Terminated => InstanceState::Terminated,
            InstanceStateName::Stopping => InstanceState::Stopping,
            InstanceStateName::Stopped => InstanceState::Stopped,
            other => InstanceState::Unknown(other.as_str().to_string()),
        })
    }

    async fn terminate_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        self.ec2
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}
