use async_trait::async_trait;
use dockyard::error::ConfigurationError;
use dockyard::request::{
    self, BuildContext, ExecHook, ExposedPort, HookContext, HookPhase, LifecycleHook, Mount,
    NetworkAttachment, NetworkMode, RequestOption, ResourceFile, ResourceLimits, ResourceRequest,
};
use dockyard::wait::WaitStrategy;
use proptest::prelude::*;
use std::collections::BTreeMap;

#[test]
fn env_options_merge_key_by_key() {
    let request = request::build(
        ResourceRequest::new("redis:7"),
        [
            RequestOption::env([("X", "1")]),
            RequestOption::env([("X", "2"), ("Y", "3")]),
        ],
    )
    .expect("valid request");

    let expected: BTreeMap<String, String> = [("X", "2"), ("Y", "3")]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    assert_eq!(request.env, expected);
}

#[test]
fn sequence_options_append_unless_replaced() {
    let request = request::build(
        ResourceRequest::new("localstack/localstack"),
        [
            RequestOption::ports([4566]),
            RequestOption::ports([ExposedPort::udp(53)]),
            RequestOption::Cmd(vec!["start".into()]),
            RequestOption::Cmd(vec!["serve".into()]),
        ],
    )
    .expect("valid request");
    assert_eq!(
        request.exposed_ports,
        vec![ExposedPort::tcp(4566), ExposedPort::udp(53)]
    );
    assert_eq!(request.cmd, Some(vec!["serve".to_string()]));

    let replaced = request::build(
        request,
        [RequestOption::SetPorts(vec![ExposedPort::tcp(8080)])],
    )
    .expect("valid request");
    assert_eq!(replaced.exposed_ports, vec![ExposedPort::tcp(8080)]);
}

#[test]
fn set_options_replace_networks_files_and_mounts() {
    let request = request::build(
        ResourceRequest::new("localstack/localstack"),
        [
            RequestOption::network("backend", ["aws"]),
            RequestOption::AddFiles(vec![ResourceFile::from_contents(
                b"one".to_vec(),
                "/etc/one.conf",
                0o644,
            )]),
            RequestOption::AddMounts(vec![Mount::volume("cache", "/var/cache")]),
        ],
    )
    .expect("valid request");

    let replaced = request::build(
        request,
        [
            RequestOption::SetNetworks(vec![NetworkAttachment::new("frontend", ["edge"])]),
            RequestOption::SetFiles(vec![ResourceFile::from_contents(
                b"two".to_vec(),
                "/etc/two.conf",
                0o600,
            )]),
            RequestOption::SetMounts(vec![Mount::bind("/tmp/data", "/data").read_only()]),
        ],
    )
    .expect("valid request");

    assert_eq!(replaced.networks, vec!["frontend"]);
    assert!(replaced.aliases("backend").is_empty(), "old aliases are dropped too");
    assert_eq!(replaced.aliases("frontend"), ["edge"]);
    assert_eq!(replaced.files.len(), 1);
    assert_eq!(replaced.files[0].container_path, "/etc/two.conf");
    assert_eq!(
        replaced.mounts,
        vec![Mount::bind("/tmp/data", "/data").read_only()]
    );
}

#[test]
fn default_port_wait_needs_an_exposed_port() {
    let err = request::build(
        ResourceRequest::new("web:1"),
        [RequestOption::WaitFor(WaitStrategy::for_http("/health").into())],
    )
    .expect_err("no port to probe");
    assert_eq!(
        err,
        ConfigurationError::NoExposedPorts {
            probe: "http(GET /health)".to_string()
        }
    );
}

#[test]
fn aliases_for_an_unjoined_network_are_rejected() {
    let mut request = ResourceRequest::new("redis:7");
    request
        .network_aliases
        .insert("backend".to_string(), vec!["redis".to_string()]);

    let err = request::validate(&request).expect_err("aliases without membership");
    assert_eq!(
        err,
        ConfigurationError::AliasesWithoutNetwork {
            network: "backend".to_string()
        }
    );
}

#[test]
fn duplicate_ports_are_rejected() {
    let err = request::build(
        ResourceRequest::new("redis:7"),
        [RequestOption::ports([6379]), RequestOption::ports([6379])],
    )
    .expect_err("6379/tcp twice");
    assert_eq!(
        err,
        ConfigurationError::DuplicatePort {
            port: "6379/tcp".to_string()
        }
    );
}

#[test]
fn image_and_build_are_mutually_exclusive() {
    let err = request::build(
        ResourceRequest::new("redis:7"),
        [RequestOption::Build(BuildContext::new("./docker"))],
    )
    .expect_err("image plus build");
    assert!(matches!(err, ConfigurationError::ImageAndBuild { .. }));
}

#[test]
fn network_aliases_keep_call_order() {
    let request = request::build(
        ResourceRequest::new("localstack/localstack"),
        [
            RequestOption::network("backend", ["aws"]),
            RequestOption::network("frontend", ["edge"]),
            RequestOption::network("backend", ["s3", "localstack"]),
        ],
    )
    .expect("valid request");

    assert_eq!(request.networks, vec!["backend", "frontend"]);
    assert_eq!(request.aliases("backend"), ["aws", "s3", "localstack"]);
    assert_eq!(request.canonical_alias(), Some("localstack"));
}

#[test]
fn container_network_mode_excludes_networks() {
    let err = request::build(
        ResourceRequest::new("redis:7"),
        [
            RequestOption::network("backend", ["redis"]),
            RequestOption::NetworkMode(NetworkMode::Container("primary".into())),
        ],
    )
    .expect_err("namespace sharing plus networks");
    assert_eq!(
        err,
        ConfigurationError::NamespaceWithNetworks {
            mode: "container:primary".to_string()
        }
    );
}

#[test]
fn wait_options_compose_into_all() {
    let request = request::build(
        ResourceRequest::new("cosmos-emulator"),
        [
            RequestOption::ports([8081]),
            RequestOption::WaitFor(WaitStrategy::for_listening_port(8081).skip_dial().into()),
            RequestOption::AlsoWaitFor(WaitStrategy::for_http("/_explorer/emulator.pem").into()),
        ],
    )
    .expect("valid request");

    let strategy = request.wait.expect("wait strategy set");
    assert_eq!(
        strategy.to_string(),
        "all[port(8081/tcp), http(GET /_explorer/emulator.pem)]"
    );
}

#[test]
fn wait_on_unexposed_port_is_rejected() {
    let err = request::build(
        ResourceRequest::new("redis:7"),
        [
            RequestOption::ports([6379]),
            RequestOption::WaitFor(WaitStrategy::for_listening_port(6380).into()),
        ],
    )
    .expect_err("6380 not exposed");
    assert!(matches!(err, ConfigurationError::UnexposedWaitPort { .. }));
}

#[test]
fn invalid_log_pattern_is_rejected() {
    let err = request::build(
        ResourceRequest::new("redis:7"),
        [RequestOption::WaitFor(
            WaitStrategy::from(dockyard::wait::LogProbe::regex("ready (")),
        )],
    )
    .expect_err("unbalanced group");
    assert!(matches!(err, ConfigurationError::InvalidPattern { .. }));
}

#[derive(Debug)]
struct RenderTemplates;

#[async_trait]
impl LifecycleHook for RenderTemplates {
    fn name(&self) -> &str {
        "render-templates"
    }

    fn requires_resource(&self) -> bool {
        false
    }

    async fn run(&self, _ctx: &HookContext<'_>) -> dockyard::Result<()> {
        Ok(())
    }
}

#[test]
fn pre_create_hooks_must_not_need_a_resource() {
    let accepted = request::build(
        ResourceRequest::new("kafka"),
        [RequestOption::hook(HookPhase::PreCreate, RenderTemplates)],
    )
    .expect("host-side hook is fine before create");
    assert_eq!(accepted.hooks.pre_create.len(), 1);

    let err = request::build(
        ResourceRequest::new("kafka"),
        [RequestOption::hook(
            HookPhase::PreCreate,
            ExecHook::new("create-topic", ["kafka-topics", "--create"]),
        )],
    )
    .expect_err("exec needs a resource");
    assert_eq!(
        err,
        ConfigurationError::HookPhase {
            phase: "pre-create".to_string(),
            hook: "create-topic".to_string()
        }
    );
}

#[test]
fn host_config_options_apply() {
    let limits = ResourceLimits {
        memory_bytes: Some(512 * 1024 * 1024),
        ..ResourceLimits::default()
    };
    let request = request::build(
        ResourceRequest::new("postgres:16"),
        [
            RequestOption::AutoRemove(true),
            RequestOption::CapAdd(vec!["NET_ADMIN".into()]),
            RequestOption::ExtraHosts(vec!["host.docker.internal:host-gateway".into()]),
            RequestOption::Resources(limits.clone()),
            RequestOption::Started(false),
        ],
    )
    .expect("valid request");

    assert!(request.host.auto_remove);
    assert_eq!(request.host.cap_add, vec!["NET_ADMIN"]);
    assert_eq!(request.host.extra_hosts.len(), 1);
    assert_eq!(request.host.resources, limits);
    assert!(!request.started);
}

proptest! {
    #[test]
    fn later_env_options_win(
        first in proptest::collection::btree_map("[A-Z]{1,3}", "[a-z0-9]{0,4}", 0..6),
        second in proptest::collection::btree_map("[A-Z]{1,3}", "[a-z0-9]{0,4}", 0..6),
    ) {
        let request = request::build(
            ResourceRequest::new("redis:7"),
            [RequestOption::Env(first.clone()), RequestOption::Env(second.clone())],
        )
        .expect("env never invalidates a request");

        let mut expected = first;
        expected.extend(second);
        prop_assert_eq!(request.env, expected);
    }
}
