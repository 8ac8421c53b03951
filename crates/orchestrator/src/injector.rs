//! Launch-time materialisation of environment-variable bindings.

use std::collections::HashMap;

use convoy_topology::{ResolvedEndpoints, ServiceDefinition, TopologyError, ValueExpr};

/// Materialises `service`'s environment-variable bindings.
///
/// Endpoint references are substituted with the resolver's concrete
/// `scheme://host:port` address now, at launch time, so addresses assigned
/// late are still observed correctly.
///
/// # Errors
///
/// Returns [`TopologyError::UnresolvedReference`] if a referenced endpoint
/// was never resolved. Topology validation makes this unreachable for a
/// built topology; the check guards the invariant.
pub fn materialize_env(
    service: &ServiceDefinition,
    endpoints: &ResolvedEndpoints,
) -> Result<HashMap<String, String>, TopologyError> {
    let mut env = HashMap::new();

    for binding in &service.env {
        let value = match &binding.value {
            ValueExpr::Literal(value) => value.clone(),
            ValueExpr::EndpointRef {
                service: target,
                endpoint,
            } => endpoints
                .get(target, endpoint)
                .ok_or_else(|| TopologyError::UnresolvedReference {
                    service: target.clone(),
                    endpoint: endpoint.clone(),
                })?
                .address(),
        };
        env.insert(binding.key.clone(), value);
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_topology::{
        EndpointSpec, LaunchDescriptor, Topology, resolve_endpoints,
    };

    #[test]
    fn substitutes_resolved_addresses_and_literals() {
        let api = ServiceDefinition::new(
            "api",
            LaunchDescriptor::new("true", Vec::<String>::new()),
        )
        .with_endpoint(EndpointSpec {
            label: "https".to_string(),
            scheme: "https".to_string(),
            port: Some(8443),
            external: false,
            proxied: false,
        });
        let web = ServiceDefinition::new(
            "web",
            LaunchDescriptor::new("true", Vec::<String>::new()),
        )
        .with_env_literal("MODE", "production")
        .with_env_endpoint("API_BASE_URL", "api", "https");

        let topology = Topology::build(vec![api, web]).unwrap();
        let endpoints = resolve_endpoints(&topology).unwrap();

        let env = materialize_env(topology.get("web").unwrap(), &endpoints).unwrap();
        assert_eq!(env["MODE"], "production");
        assert_eq!(env["API_BASE_URL"], "https://localhost:8443");
    }

    #[test]
    fn unresolved_references_are_reported() {
        let web = ServiceDefinition::new(
            "web",
            LaunchDescriptor::new("true", Vec::<String>::new()),
        )
        .with_env_endpoint("API_BASE_URL", "api", "https");

        let err = materialize_env(&web, &ResolvedEndpoints::default()).unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnresolvedReference {
                service: "api".to_string(),
                endpoint: "https".to_string(),
            }
        );
    }
}
