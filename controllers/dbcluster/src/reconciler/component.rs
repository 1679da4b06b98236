//! Per-kind behavior of cluster components.
//!
//! `ComponentKind` is a closed set, so each hook is a `match` rather than a
//! trait object per component.

use crate::context::ReconcileContext;
use crate::reconciler::stores::bounded_store_labels;
use crds::{ComponentKind, ComponentSpec};
use k8s_openapi::api::core::v1::ContainerPort;
use std::fmt::Write;

/// Mount point of the rendered ConfigMap inside every pod
pub const CONFIG_DIR: &str = "/etc/dbops";
pub const CLUSTER_TLS_DIR: &str = "/etc/dbops/tls";
pub const CLIENT_TLS_DIR: &str = "/etc/dbops/client-tls";
pub const DATA_DIR: &str = "/var/lib/dbops";

/// Secret holding the gateway's client-facing certificate.
pub fn client_tls_secret_name(cluster: &str) -> String {
    format!("{}-server-secret", ComponentKind::Gateway.resource_name(cluster))
}

pub trait ComponentReconciler {
    /// Executable started in the container.
    fn binary(&self) -> &'static str;

    fn container_ports(&self) -> Vec<ContainerPort>;

    /// Entry script rendered into the component's ConfigMap.
    fn start_script(&self, ctx: &ReconcileContext<'_>, spec: &ComponentSpec) -> String;

    /// Secrets that must exist before the component can start.
    fn required_secrets(&self, ctx: &ReconcileContext<'_>) -> Vec<String>;
}

impl ComponentReconciler for ComponentKind {
    fn binary(&self) -> &'static str {
        match self {
            ComponentKind::Meta => "/meta-server",
            ComponentKind::Store => "/store-server",
            ComponentKind::Gateway => "/gateway-server",
            ComponentKind::Cdc => "/cdc",
            ComponentKind::LogReplication => "/log-replication",
            ComponentKind::Columnar => "/columnar-server",
            ComponentKind::Monitor => "/bin/prometheus",
        }
    }

    fn container_ports(&self) -> Vec<ContainerPort> {
        let mut ports = vec![ContainerPort {
            name: Some("client".to_string()),
            container_port: self.client_port(),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }];
        if let Some(peer) = self.peer_port() {
            ports.push(ContainerPort {
                name: Some("peer".to_string()),
                container_port: peer,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }
        ports
    }

    fn start_script(&self, ctx: &ReconcileContext<'_>, spec: &ComponentSpec) -> String {
        let peer_service = self.peer_service_name(&ctx.name);
        let advertise = format!(
            "${{POD_NAME}}.{}.{}.svc:{}",
            peer_service,
            ctx.namespace,
            self.client_port()
        );

        let mut args = vec![
            "--name=${POD_NAME}".to_string(),
            format!("--config={}/config.toml", CONFIG_DIR),
        ];
        match self {
            ComponentKind::Meta => {
                args.push(format!("--peer-service={}.{}.svc", peer_service, ctx.namespace));
                args.push(format!("--data-dir={}/meta", DATA_DIR));
            }
            ComponentKind::Monitor => {
                args = vec![
                    format!("--config.file={}/config.toml", CONFIG_DIR),
                    format!("--storage.tsdb.path={}/monitor", DATA_DIR),
                ];
            }
            _ => {
                args.push(format!("--meta-endpoints={}", ctx.meta_endpoint()));
                args.push(format!("--advertise-addr={}", advertise));
                if self.is_stateful() {
                    args.push(format!("--data-dir={}/{}", DATA_DIR, self.as_str()));
                }
            }
        }

        if ctx.cluster.spec.enable_tls && *self != ComponentKind::Monitor {
            args.push(format!("--cacert={}/ca.crt", CLUSTER_TLS_DIR));
            args.push(format!("--cert={}/tls.crt", CLUSTER_TLS_DIR));
            args.push(format!("--key={}/tls.key", CLUSTER_TLS_DIR));
        }
        if ctx.cluster.spec.enable_client_tls && *self == ComponentKind::Gateway {
            args.push(format!("--client-cert={}/tls.crt", CLIENT_TLS_DIR));
            args.push(format!("--client-key={}/tls.key", CLIENT_TLS_DIR));
        }
        if self.tracks_stores() {
            let labels = bounded_store_labels(&spec.store_labels);
            if !labels.is_empty() {
                let rendered: Vec<_> = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                args.push(format!("--labels={}", rendered.join(",")));
            }
        }

        let mut script = String::from("#!/bin/sh\nset -e\n");
        let _ = write!(script, "exec {}", self.binary());
        for arg in args {
            let _ = write!(script, " \\\n  {}", arg);
        }
        script.push('\n');
        script
    }

    fn required_secrets(&self, ctx: &ReconcileContext<'_>) -> Vec<String> {
        let mut secrets = Vec::new();
        if ctx.cluster.spec.enable_tls && *self != ComponentKind::Monitor {
            secrets.push(self.cluster_tls_secret_name(&ctx.name));
        }
        if ctx.cluster.spec.enable_client_tls && *self == ComponentKind::Gateway {
            secrets.push(client_tls_secret_name(&ctx.name));
        }
        secrets
    }
}
