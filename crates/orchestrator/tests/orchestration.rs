//! End-to-end orchestration against a scripted runtime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use convoy_orchestrator::{
    FailureReason, Orchestrator, OrchestratorConfig, ReadinessState,
};
use convoy_runtime_mock::{Behaviour, MockRuntime};
use convoy_topology::{
    EndpointSpec, HealthCheckSpec, LaunchDescriptor, ServiceDefinition, Topology,
};

fn service(name: &str) -> ServiceDefinition {
    ServiceDefinition::new(name, LaunchDescriptor::new("true", Vec::<String>::new()))
}

fn https_endpoint(port: u16) -> EndpointSpec {
    EndpointSpec {
        label: "https".to_string(),
        scheme: "https".to_string(),
        port: Some(port),
        external: false,
        proxied: false,
    }
}

fn health_check(interval_ms: u64, timeout_ms: u64) -> HealthCheckSpec {
    HealthCheckSpec {
        endpoint: "https".to_string(),
        path: "/health".to_string(),
        interval_ms,
        timeout_ms,
    }
}

async fn wait_until<F>(orchestrator: &Orchestrator<MockRuntime>, predicate: F)
where
    F: Fn(&BTreeMap<String, ReadinessState>) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&orchestrator.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("composition did not reach the expected state in time");
}

#[tokio::test]
async fn dependents_launch_after_health_with_injected_addresses() {
    let api = service("api")
        .with_endpoint(https_endpoint(8443))
        .with_health_check(health_check(10, 1_000));
    let web = service("web")
        .with_reference("api")
        .wait_for("api")
        .with_env_endpoint("API_BASE_URL", "api", "https");
    let topology = Topology::build(vec![api, web]).unwrap();

    let runtime = MockRuntime::new().with_behaviour(
        "api",
        Behaviour {
            probes_until_healthy: 2,
            ..Behaviour::default()
        },
    );
    let orchestrator =
        Orchestrator::new(topology, runtime.clone(), OrchestratorConfig::default()).unwrap();

    orchestrator.start().await.unwrap();

    // web only launches once api is healthy, so by the time its launch was
    // recorded the injected address was already live.
    assert_eq!(runtime.launch_order(), vec!["api", "web"]);
    assert_eq!(
        orchestrator.snapshot()["api"],
        ReadinessState::Healthy
    );
    let env = runtime.injected_env("web").unwrap();
    assert_eq!(env["API_BASE_URL"], "https://localhost:8443");

    wait_until(&orchestrator, |states| {
        states["web"] == ReadinessState::Healthy
    })
    .await;

    orchestrator.shutdown().await;
    assert_eq!(runtime.stop_order(), vec!["web", "api"]);
    assert!(orchestrator
        .snapshot()
        .values()
        .all(|state| *state == ReadinessState::Stopped));
}

#[tokio::test]
async fn launch_failure_blocks_transitive_dependents() {
    let api = service("api");
    let web = service("web").wait_for("api");
    let worker = service("worker").wait_for("web");
    let topology = Topology::build(vec![api, web, worker]).unwrap();

    let runtime = MockRuntime::new().with_behaviour(
        "api",
        Behaviour {
            fail_launch: true,
            ..Behaviour::default()
        },
    );
    let orchestrator =
        Orchestrator::new(topology, runtime.clone(), OrchestratorConfig::default()).unwrap();

    orchestrator.start().await.unwrap();

    let states = orchestrator.snapshot();
    assert_eq!(
        states["api"],
        ReadinessState::Failed(FailureReason::LaunchFailed)
    );
    assert_eq!(
        states["web"],
        ReadinessState::Failed(FailureReason::BlockedBy("api".to_string()))
    );
    assert_eq!(
        states["worker"],
        ReadinessState::Failed(FailureReason::BlockedBy("web".to_string()))
    );

    // Blocked services were never handed to the runtime.
    assert_eq!(runtime.launch_order(), vec!["api"]);

    orchestrator.shutdown().await;
    assert!(runtime.stop_order().is_empty());
}

#[tokio::test]
async fn unrelated_branches_survive_a_contained_failure() {
    let api = service("api");
    let web = service("web").wait_for("api");
    let worker = service("worker");
    let topology = Topology::build(vec![api, web, worker]).unwrap();

    let runtime = MockRuntime::new().with_behaviour(
        "api",
        Behaviour {
            fail_launch: true,
            ..Behaviour::default()
        },
    );
    let orchestrator =
        Orchestrator::new(topology, runtime.clone(), OrchestratorConfig::default()).unwrap();

    orchestrator.start().await.unwrap();
    wait_until(&orchestrator, |states| {
        states["worker"] == ReadinessState::Healthy
    })
    .await;

    let states = orchestrator.snapshot();
    assert_eq!(
        states["api"],
        ReadinessState::Failed(FailureReason::LaunchFailed)
    );
    assert_eq!(
        states["web"],
        ReadinessState::Failed(FailureReason::BlockedBy("api".to_string()))
    );

    orchestrator.shutdown().await;
    assert_eq!(runtime.stop_order(), vec!["worker"]);
}

#[tokio::test]
async fn health_check_deadline_is_reported_distinctly() {
    let api = service("api")
        .with_endpoint(https_endpoint(8443))
        .with_health_check(health_check(10, 50));
    let topology = Topology::build(vec![api]).unwrap();

    let runtime = MockRuntime::new().with_behaviour(
        "api",
        Behaviour {
            never_healthy: true,
            ..Behaviour::default()
        },
    );
    let orchestrator =
        Orchestrator::new(topology, runtime, OrchestratorConfig::default()).unwrap();

    orchestrator.start().await.unwrap();
    wait_until(&orchestrator, |states| {
        states["api"] == ReadinessState::Failed(FailureReason::HealthCheckTimeout)
    })
    .await;

    orchestrator.shutdown().await;
    assert_eq!(
        orchestrator.snapshot()["api"],
        ReadinessState::Failed(FailureReason::HealthCheckTimeout)
    );
}

#[tokio::test]
async fn fatal_failure_aborts_the_whole_composition() {
    let api = service("api")
        .with_endpoint(https_endpoint(8443))
        .with_health_check(health_check(10, 50));
    let web = service("web");
    let topology = Topology::build(vec![api, web]).unwrap();

    let runtime = MockRuntime::new().with_behaviour(
        "api",
        Behaviour {
            never_healthy: true,
            ..Behaviour::default()
        },
    );
    let config = OrchestratorConfig {
        fatal_services: ["api".to_string()].into_iter().collect(),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(topology, runtime.clone(), config).unwrap();

    // run() must return on its own once the fatal service fails.
    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("fatal failure did not abort the run")
        .unwrap();

    assert!(!report.is_clean());
    assert_eq!(
        report.states()["api"],
        ReadinessState::Failed(FailureReason::HealthCheckTimeout)
    );
    assert_eq!(report.states()["web"], ReadinessState::Stopped);
    assert_eq!(runtime.stop_order(), vec!["web", "api"]);
}

#[tokio::test]
async fn shutdown_stops_in_reverse_startup_order() {
    let db = service("db");
    let api = service("api").wait_for("db");
    let web = service("web").wait_for("api");
    let topology = Topology::build(vec![db, api, web]).unwrap();

    let runtime = MockRuntime::new();
    let orchestrator = Arc::new(
        Orchestrator::new(topology, runtime.clone(), OrchestratorConfig::default()).unwrap(),
    );

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run().await }
    });

    wait_until(&orchestrator, |states| {
        states.values().all(|s| *s == ReadinessState::Healthy)
    })
    .await;

    orchestrator.shutdown_token().cancel();
    let report = running.await.unwrap().unwrap();

    assert!(report.is_clean());
    assert_eq!(runtime.launch_order(), vec!["db", "api", "web"]);
    assert_eq!(runtime.stop_order(), vec!["web", "api", "db"]);
}

#[tokio::test]
async fn empty_topology_is_a_clean_noop() {
    let topology = Topology::build(Vec::new()).unwrap();
    let orchestrator =
        Orchestrator::new(topology, MockRuntime::new(), OrchestratorConfig::default()).unwrap();

    let report = orchestrator.run().await.unwrap();
    assert!(report.is_clean());
    assert!(report.states().is_empty());
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let topology = Topology::build(vec![service("api")]).unwrap();
    let orchestrator =
        Orchestrator::new(topology, MockRuntime::new(), OrchestratorConfig::default()).unwrap();

    orchestrator.start().await.unwrap();
    assert!(orchestrator.start().await.is_err());
    orchestrator.shutdown().await;
}
