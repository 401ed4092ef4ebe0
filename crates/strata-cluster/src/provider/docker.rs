//! Docker infrastructure provider
//!
//! Reconciles clusters whose datacenter is a `DockerDatacenterConfig`,
//! mainly for local development with kind node images.
//!
//! # Generated CAPI Resources
//!
//! 1. **Cluster** - the CAPI cluster, referencing the objects below
//! 2. **DockerCluster** - Docker-specific cluster infrastructure
//! 3. **KubeadmControlPlane** - control plane with node count and version
//! 4. **DockerMachineTemplate** (control plane)
//! 5. **EtcdadmCluster** and its **DockerMachineTemplate**, with external etcd
//! 6. Per worker node group: **MachineDeployment**, **KubeadmConfigTemplate**
//!    and **DockerMachineTemplate**
//!
//! Templates are immutable once created. Their names come from
//! [`ImmutableObjectNamer`] run against the template the live owner points
//! at, so an unchanged template keeps its name and a changed one rolls to the
//! next suffix.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use strata_common::crd::{
    DockerDatacenterConfig, DockerDatacenterConfigSpec, WorkerNodeGroupConfiguration,
    DOCKER_DATACENTER_KIND,
};
use strata_common::kinds::{
    ObjectKind, BOOTSTRAP_API_VERSION, CONTROL_PLANE_API_VERSION, ETCD_API_VERSION,
    INFRASTRUCTURE_API_VERSION,
};
use strata_common::store::ResourceStore;
use strata_common::{Error, ReconcilerConfig, CLUSTER_NAME_LABEL};

use super::{
    referenced_object, CniPhase, ControlPlaneReadyPhase, BOOTSTRAP_TEMPLATE_REF,
    CONTROL_PLANE_TEMPLATE_REF, ETCD_TEMPLATE_REF, INFRA_TEMPLATE_REF,
};
use crate::cilium::{CiliumTemplater, CiliumUpgrader};
use crate::conditions::{etcd_cluster_name, machine_deployment_name};
use crate::control_plane::{ControlPlaneObjectSet, ControlPlaneOrchestrator};
use crate::naming::{ImmutableObjectNamer, ObjectName, WORKER_TAINTS_POINTER};
use crate::objects::ObjectBuilder;
use crate::phases::{Phase, PhaseRunner, ReconcileResult};
use crate::registry::ProviderReconciler;
use crate::spec::ClusterSpec;
use crate::workers::{WorkerGroupObjects, WorkerObjectSet, WorkerOrchestrator};

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// kind nodes share the host disk, so disk-pressure eviction is disabled
const EVICTION_HARD: &str = "nodefs.available<0%,nodefs.inodesFree<0%,imagefs.available<0%";

/// Worker taints must match exactly: a missing list is not an empty one
const WORKER_EXACT_FIELDS: &[&str] = &[WORKER_TAINTS_POINTER];

/// Decode the cluster's datacenter config
pub fn docker_datacenter(spec: &ClusterSpec) -> Result<DockerDatacenterConfigSpec, Error> {
    spec.datacenter
        .clone()
        .try_parse::<DockerDatacenterConfig>()
        .map(|dc| dc.spec)
        .map_err(|e| {
            Error::serialization_for_kind(
                DOCKER_DATACENTER_KIND,
                format!(
                    "{}/{}: {}",
                    spec.namespace(),
                    spec.config().datacenter_ref.name,
                    e
                ),
            )
        })
}

/// Generates the Docker provider's CAPI objects for one cluster
pub struct DockerObjects<'a> {
    store: &'a dyn ResourceStore,
    spec: &'a ClusterSpec,
    datacenter: DockerDatacenterConfigSpec,
}

impl<'a> DockerObjects<'a> {
    /// Generator reading live templates from `store`
    pub fn new(
        store: &'a dyn ResourceStore,
        spec: &'a ClusterSpec,
        datacenter: DockerDatacenterConfigSpec,
    ) -> Self {
        Self {
            store,
            spec,
            datacenter,
        }
    }

    /// Cluster, infrastructure cluster, control plane and external etcd
    pub async fn control_plane(&self) -> Result<ControlPlaneObjectSet, Error> {
        let spec = self.spec;
        let name = spec.name();
        let namer = ImmutableObjectNamer::default();
        let template_spec = self.machine_template_spec();

        let live_control_plane = self
            .store
            .get(
                &ObjectKind::KubeadmControlPlane.api_resource(),
                name,
                spec.namespace(),
            )
            .await?;
        let live_template = referenced_object(
            self.store,
            live_control_plane.as_ref(),
            CONTROL_PLANE_TEMPLATE_REF,
            ObjectKind::DockerMachineTemplate,
        )
        .await?;
        let cp_template = namer.name(
            &format!("{}-control-plane-1", name),
            &template_spec,
            live_template.as_ref(),
        );
        log_rotation("control plane", &cp_template);

        let (etcd_cluster, etcd_machine_template) =
            match &spec.config().external_etcd_configuration {
                Some(etcd) => {
                    let live_etcd = self
                        .store
                        .get(
                            &ObjectKind::EtcdadmCluster.api_resource(),
                            &etcd_cluster_name(name),
                            spec.namespace(),
                        )
                        .await?;
                    let live_template = referenced_object(
                        self.store,
                        live_etcd.as_ref(),
                        ETCD_TEMPLATE_REF,
                        ObjectKind::DockerMachineTemplate,
                    )
                    .await?;
                    let etcd_template = namer.name(
                        &format!("{}-etcd-1", name),
                        &template_spec,
                        live_template.as_ref(),
                    );
                    log_rotation("etcd", &etcd_template);
                    (
                        Some(self.etcd_cluster(etcd.count, &etcd_template.name)),
                        Some(self.machine_template(&etcd_template.name, template_spec.clone())),
                    )
                }
                None => (None, None),
            };

        Ok(ControlPlaneObjectSet {
            cluster: self.cluster(),
            infra_cluster: self.docker_cluster(),
            control_plane: self.kubeadm_control_plane(&cp_template.name),
            control_plane_machine_template: self.machine_template(&cp_template.name, template_spec),
            etcd_cluster,
            etcd_machine_template,
            other: Vec::new(),
        })
    }

    /// One MachineDeployment and its two templates per worker node group
    pub async fn workers(&self) -> Result<WorkerObjectSet, Error> {
        let mut groups = Vec::new();
        for group in &self.spec.config().worker_node_group_configurations {
            groups.push(self.worker_group(group).await?);
        }
        Ok(WorkerObjectSet {
            groups,
            other: Vec::new(),
        })
    }

    async fn worker_group(
        &self,
        group: &WorkerNodeGroupConfiguration,
    ) -> Result<WorkerGroupObjects, Error> {
        let deployment_name = machine_deployment_name(self.spec.name(), &group.name);
        let fresh_name = format!("{}-1", deployment_name);

        let live_deployment = self
            .store
            .get(
                &ObjectKind::MachineDeployment.api_resource(),
                &deployment_name,
                self.spec.namespace(),
            )
            .await?;
        let live_bootstrap = referenced_object(
            self.store,
            live_deployment.as_ref(),
            BOOTSTRAP_TEMPLATE_REF,
            ObjectKind::KubeadmConfigTemplate,
        )
        .await?;
        let live_infra = referenced_object(
            self.store,
            live_deployment.as_ref(),
            INFRA_TEMPLATE_REF,
            ObjectKind::DockerMachineTemplate,
        )
        .await?;

        let bootstrap_spec = bootstrap_template_spec(group);
        let bootstrap = ImmutableObjectNamer::new(WORKER_EXACT_FIELDS).name(
            &fresh_name,
            &bootstrap_spec,
            live_bootstrap.as_ref(),
        );
        log_rotation(&group.name, &bootstrap);

        let infra_spec = self.machine_template_spec();
        let infra = ImmutableObjectNamer::default().name_paired(
            &fresh_name,
            &infra_spec,
            live_infra.as_ref(),
            bootstrap.rotated,
        );
        log_rotation(&group.name, &infra);

        Ok(WorkerGroupObjects {
            machine_deployment: self.machine_deployment(
                &deployment_name,
                group,
                &bootstrap.name,
                &infra.name,
            ),
            bootstrap_config_template: self
                .object(ObjectKind::KubeadmConfigTemplate, &bootstrap.name)
                .with_spec(bootstrap_spec)
                .build(),
            infra_machine_template: self.machine_template(&infra.name, infra_spec),
        })
    }

    fn object(&self, kind: ObjectKind, name: &str) -> ObjectBuilder {
        ObjectBuilder::of(kind, name, self.spec.namespace()).for_cluster(self.spec.name())
    }

    fn machine_template_spec(&self) -> Value {
        let mut machine = json!({ "customImage": self.spec.bundle.spec.kind_node.reference() });
        if self.datacenter.mount_docker_socket {
            machine["extraMounts"] = json!([{
                "containerPath": DOCKER_SOCKET,
                "hostPath": DOCKER_SOCKET
            }]);
        }
        json!({ "template": { "spec": machine } })
    }

    fn machine_template(&self, name: &str, template_spec: Value) -> DynamicObject {
        self.object(ObjectKind::DockerMachineTemplate, name)
            .with_spec(template_spec)
            .build()
    }

    fn cluster(&self) -> DynamicObject {
        let name = self.spec.name();
        let network = &self.spec.config().cluster_network;

        let mut spec = json!({
            "clusterNetwork": {
                "pods": { "cidrBlocks": network.pod_cidrs },
                "services": { "cidrBlocks": network.service_cidrs }
            },
            "controlPlaneRef": {
                "apiVersion": CONTROL_PLANE_API_VERSION,
                "kind": ObjectKind::KubeadmControlPlane.kind_str(),
                "name": name
            },
            "infrastructureRef": {
                "apiVersion": INFRASTRUCTURE_API_VERSION,
                "kind": ObjectKind::DockerCluster.kind_str(),
                "name": name
            }
        });
        if self.spec.config().has_external_etcd() {
            spec["managedExternalEtcdRef"] = json!({
                "apiVersion": ETCD_API_VERSION,
                "kind": ObjectKind::EtcdadmCluster.kind_str(),
                "name": etcd_cluster_name(name),
                "namespace": self.spec.namespace()
            });
        }

        self.object(ObjectKind::CapiCluster, name)
            .with_spec(spec)
            .build()
    }

    fn docker_cluster(&self) -> DynamicObject {
        self.object(ObjectKind::DockerCluster, self.spec.name())
            .with_spec(json!({}))
            .build()
    }

    fn kubeadm_control_plane(&self, template_name: &str) -> DynamicObject {
        let config = self.spec.config();

        let mut cert_sans = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        if let Some(endpoint) = &config.control_plane_configuration.endpoint {
            if !cert_sans.contains(endpoint) {
                cert_sans.push(endpoint.clone());
            }
        }

        let mut cluster_configuration = json!({ "apiServer": { "certSANs": cert_sans } });
        if config.has_external_etcd() {
            cluster_configuration["etcd"] = json!({
                "external": {
                    "endpoints": [],
                    "caFile": "/etc/kubernetes/pki/etcd/ca.crt",
                    "certFile": "/etc/kubernetes/pki/apiserver-etcd-client.crt",
                    "keyFile": "/etc/kubernetes/pki/apiserver-etcd-client.key"
                }
            });
        }

        let mut node_registration = json!({
            "kubeletExtraArgs": { "eviction-hard": EVICTION_HARD }
        });
        if let Some(taints) = &config.control_plane_configuration.taints {
            node_registration["taints"] = json!(taints);
        }

        self.object(ObjectKind::KubeadmControlPlane, self.spec.name())
            .with_spec(json!({
                "replicas": config.control_plane_configuration.count,
                "version": self.spec.bundle.spec.kubernetes_version,
                "machineTemplate": {
                    "infrastructureRef": {
                        "apiVersion": INFRASTRUCTURE_API_VERSION,
                        "kind": ObjectKind::DockerMachineTemplate.kind_str(),
                        "name": template_name
                    }
                },
                "kubeadmConfigSpec": {
                    "clusterConfiguration": cluster_configuration,
                    "initConfiguration": { "nodeRegistration": node_registration.clone() },
                    "joinConfiguration": { "nodeRegistration": node_registration }
                }
            }))
            .build()
    }

    fn etcd_cluster(&self, count: u32, template_name: &str) -> DynamicObject {
        let etcd = &self.spec.bundle.spec.etcd;
        self.object(ObjectKind::EtcdadmCluster, &etcd_cluster_name(self.spec.name()))
            .with_spec(json!({
                "replicas": count,
                "etcdadmConfigSpec": {
                    "etcdadmBuiltin": true,
                    "cloudInitConfig": {
                        "version": etcd.tag.trim_start_matches('v')
                    }
                },
                "infrastructureTemplate": {
                    "apiVersion": INFRASTRUCTURE_API_VERSION,
                    "kind": ObjectKind::DockerMachineTemplate.kind_str(),
                    "name": template_name,
                    "namespace": self.spec.namespace()
                }
            }))
            .build()
    }

    fn machine_deployment(
        &self,
        name: &str,
        group: &WorkerNodeGroupConfiguration,
        bootstrap_template: &str,
        infra_template: &str,
    ) -> DynamicObject {
        let cluster = self.spec.name();
        self.object(ObjectKind::MachineDeployment, name)
            .with_spec(json!({
                "clusterName": cluster,
                "replicas": group.count,
                "selector": { "matchLabels": {} },
                "template": {
                    "metadata": { "labels": { CLUSTER_NAME_LABEL: cluster } },
                    "spec": {
                        "clusterName": cluster,
                        "version": self.spec.bundle.spec.kubernetes_version,
                        "bootstrap": {
                            "configRef": {
                                "apiVersion": BOOTSTRAP_API_VERSION,
                                "kind": ObjectKind::KubeadmConfigTemplate.kind_str(),
                                "name": bootstrap_template
                            }
                        },
                        "infrastructureRef": {
                            "apiVersion": INFRASTRUCTURE_API_VERSION,
                            "kind": ObjectKind::DockerMachineTemplate.kind_str(),
                            "name": infra_template
                        }
                    }
                }
            }))
            .build()
    }
}

/// KubeadmConfigTemplate spec for a worker group; taints are always written
fn bootstrap_template_spec(group: &WorkerNodeGroupConfiguration) -> Value {
    let mut kubelet_args = json!({ "eviction-hard": EVICTION_HARD });
    if !group.labels.is_empty() {
        let labels = group
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        kubelet_args["node-labels"] = json!(labels);
    }

    json!({
        "template": {
            "spec": {
                "joinConfiguration": {
                    "nodeRegistration": {
                        "taints": group.taints,
                        "kubeletExtraArgs": kubelet_args
                    }
                }
            }
        }
    })
}

fn log_rotation(owner: &str, name: &ObjectName) {
    if name.rotated {
        info!(owner, template = %name.name, "template changed, rolling to new name");
    }
}

struct ControlPlanePhase {
    store: Arc<dyn ResourceStore>,
    orchestrator: ControlPlaneOrchestrator,
}

#[async_trait]
impl Phase for ControlPlanePhase {
    fn name(&self) -> &str {
        "control-plane"
    }

    async fn run(&self, spec: &ClusterSpec) -> Result<ReconcileResult, Error> {
        let objects = DockerObjects::new(self.store.as_ref(), spec, docker_datacenter(spec)?)
            .control_plane()
            .await?;
        self.orchestrator.reconcile(objects).await?;
        Ok(ReconcileResult::Continue)
    }
}

struct WorkersPhase {
    store: Arc<dyn ResourceStore>,
    orchestrator: WorkerOrchestrator,
}

#[async_trait]
impl Phase for WorkersPhase {
    fn name(&self) -> &str {
        "workers"
    }

    async fn run(&self, spec: &ClusterSpec) -> Result<ReconcileResult, Error> {
        let workers = DockerObjects::new(self.store.as_ref(), spec, docker_datacenter(spec)?)
            .workers()
            .await?;
        self.orchestrator
            .reconcile(spec.name(), spec.namespace(), &workers)
            .await
    }
}

/// Provider reconciler for Docker clusters.
///
/// Phases run in order: control plane, control plane readiness, CNI, then
/// workers. Workers are only touched once the control plane is ready.
pub struct DockerReconciler {
    phases: PhaseRunner,
}

impl DockerReconciler {
    /// Build the phase pipeline
    pub fn new(
        store: Arc<dyn ResourceStore>,
        templater: Arc<dyn CiliumTemplater>,
        config: &ReconcilerConfig,
    ) -> Self {
        let apply = config.apply_options();
        let phases = PhaseRunner::new()
            .register(ControlPlanePhase {
                store: store.clone(),
                orchestrator: ControlPlaneOrchestrator::new(store.clone(), apply.clone()),
            })
            .register(ControlPlaneReadyPhase::new(
                store.clone(),
                config.control_plane_requeue,
            ))
            .register(CniPhase::new(CiliumUpgrader::new(
                store.clone(),
                templater,
                apply.clone(),
                config.cni_requeue,
            )))
            .register(WorkersPhase {
                store: store.clone(),
                orchestrator: WorkerOrchestrator::new(store, apply, config.worker_requeue),
            });
        Self { phases }
    }
}

#[async_trait]
impl ProviderReconciler for DockerReconciler {
    #[instrument(skip(self, spec, cancel), fields(cluster = spec.name()))]
    async fn reconcile(
        &self,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult, Error> {
        self.phases.run(spec, cancel).await
    }
}
