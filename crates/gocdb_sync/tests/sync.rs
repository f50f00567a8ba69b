// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end runs of the sync loop against an in-memory registry, AMS and
//! AUTHN.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::FutureExt;
use http::Method;
use serde_json::json;

use dn_normalizer::{Normalizer, RdnProfile};
use gocdb_sync::ams::AmsClient;
use gocdb_sync::authn::AuthnClient;
use gocdb_sync::registry::RegistryClient;
use gocdb_sync::{SyncReport, SyncSettings, Syncer, TopicMode};
use http_client::test_utils::{status_error, ApiClientCoreMock, MockRequest};
use http_client::{BaseApiClient, HttpError};

const SERVICE_TYPE: &str = "eu.egi.cloud.accounting";
const TYPE_TOPIC: &str = "eu-egi-cloud-accounting";
const DEFAULT_EMAIL: &str = "ops@example.org";

#[derive(Debug, Clone, PartialEq, Eq)]
struct User {
    uuid: String,
    email: String,
}

#[derive(Default)]
struct World {
    /// service type -> endpoint listing XML
    listings: HashMap<String, String>,
    /// site name -> site XML
    sites: HashMap<String, String>,
    users: BTreeMap<String, User>,
    bindings: BTreeMap<String, serde_json::Value>,
    topics: BTreeMap<String, Vec<String>>,
    rejected_bindings: HashSet<String>,
    requests: Vec<(Method, String)>,
    next_uuid: usize,
}

type Response = Result<Bytes, HttpError>;

fn json_response(value: serde_json::Value) -> Response {
    Ok(serde_json::to_vec(&value).unwrap().into())
}

impl World {
    fn handle(&mut self, request: &MockRequest) -> Response {
        self.requests
            .push((request.method.clone(), request.url.clone()));
        let rest = request.url.strip_prefix("https://").unwrap();
        let (host, rest) = rest.split_once('/').unwrap();
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        match host {
            "goc" => self.registry(path, query, request),
            "ams.example.org" => {
                assert_eq!(query, "key=amstoken");
                self.ams(path.strip_prefix("v1/").unwrap(), request)
            }
            "authn.example.org" => {
                assert_eq!(query, "key=authntoken");
                self.authn(path.strip_prefix("v1/bindings/").unwrap(), request)
            }
            _ => panic!("unexpected host in {}", request.url),
        }
    }

    fn registry(&self, path: &str, query: &str, request: &MockRequest) -> Response {
        let (key, value) = query.split_once('=').unwrap();
        let found = match (path, key) {
            ("endpoints", "type") => self.listings.get(value),
            ("site", "name") => self.sites.get(value),
            _ => None,
        };
        match found {
            Some(xml) => Ok(xml.clone().into()),
            None => Err(status_error(&request.url, 503, "registry unavailable")),
        }
    }

    fn ams(&mut self, path: &str, request: &MockRequest) -> Response {
        let url = &request.url;
        if let Some(name) = path.strip_prefix("users/") {
            return match request.method {
                Method::POST if self.users.contains_key(name) => {
                    Err(status_error(url, 409, "user exists"))
                }
                Method::POST => {
                    let body = request.json_body();
                    assert_eq!(
                        body["projects"],
                        json!([{"project": "PROJECT", "roles": ["publisher"]}])
                    );
                    self.next_uuid += 1;
                    let user = User {
                        uuid: format!("uuid-{}", self.next_uuid),
                        email: body["email"].as_str().unwrap().to_owned(),
                    };
                    self.users.insert(name.to_owned(), user.clone());
                    json_response(json!({"name": name, "uuid": user.uuid}))
                }
                Method::GET => match self.users.get(name) {
                    Some(user) => json_response(json!({"name": name, "uuid": user.uuid})),
                    None => Err(status_error(url, 404, "no such user")),
                },
                Method::DELETE => match self.users.remove(name) {
                    Some(_) => Ok(Bytes::new()),
                    None => Err(status_error(url, 404, "no such user")),
                },
                _ => panic!("unexpected {} {url}", request.method),
            };
        }

        let topic_path = path.strip_prefix("projects/PROJECT/topics/").unwrap();
        if let Some(topic) = topic_path.strip_suffix(":acl") {
            return match self.topics.get(topic) {
                Some(users) => json_response(json!({"authorized_users": users})),
                None => Err(status_error(url, 404, "no such topic")),
            };
        }
        if let Some(topic) = topic_path.strip_suffix(":modifyAcl") {
            let users: Vec<String> =
                serde_json::from_value(request.json_body()["authorized_users"].clone()).unwrap();
            return match self.topics.get_mut(topic) {
                Some(acl) => {
                    *acl = users;
                    Ok(Bytes::new())
                }
                None => Err(status_error(url, 404, "no such topic")),
            };
        }
        assert_eq!(request.method, Method::PUT);
        if self.topics.contains_key(topic_path) {
            return Err(status_error(url, 409, "topic exists"));
        }
        self.topics.insert(topic_path.to_owned(), vec![]);
        json_response(json!({"name": format!("/projects/PROJECT/topics/{topic_path}")}))
    }

    fn authn(&mut self, name: &str, request: &MockRequest) -> Response {
        let url = &request.url;
        match request.method {
            Method::POST if self.rejected_bindings.contains(name) => {
                Err(status_error(url, 400, "invalid binding"))
            }
            Method::POST if self.bindings.contains_key(name) => {
                Err(status_error(url, 409, "binding exists"))
            }
            Method::POST if self.dn_is_bound(&request.json_body()["auth_identifier"]) => {
                Err(status_error(url, 409, "binding with this auth identifier exists"))
            }
            Method::POST => {
                let mut binding = request.json_body();
                assert_eq!(binding["name"], name);
                binding["uuid"] = json!(format!("binding-{name}"));
                self.bindings.insert(name.to_owned(), binding.clone());
                json_response(binding)
            }
            Method::GET => match self.bindings.get(name) {
                Some(binding) => json_response(binding.clone()),
                None => Err(status_error(url, 404, "no such binding")),
            },
            Method::PUT => {
                let update = request.json_body();
                let binding = self.bindings.get_mut(name).unwrap();
                for (field, value) in update.as_object().unwrap() {
                    binding[field] = value.clone();
                }
                json_response(binding.clone())
            }
            _ => panic!("unexpected {} {url}", request.method),
        }
    }

    fn dn_is_bound(&self, dn: &serde_json::Value) -> bool {
        self.bindings.values().any(|b| &b["auth_identifier"] == dn)
    }

    fn writes(&self) -> usize {
        self.requests
            .iter()
            .filter(|(method, _)| *method != Method::GET)
            .count()
    }
}

struct Harness {
    world: Arc<Mutex<World>>,
}

struct Endpoint<'a> {
    host: &'a str,
    site: &'a str,
    primary_key: &'a str,
    dn: Option<&'a str>,
}

fn listing(service_type: &str, endpoints: &[Endpoint]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<results>\n");
    for e in endpoints {
        xml.push_str(&format!(
            "<SERVICE_ENDPOINT PRIMARY_KEY=\"{pk}\"><PRIMARY_KEY>{pk}</PRIMARY_KEY>\
             <HOSTNAME>{host}</HOSTNAME><SERVICE_TYPE>{service_type}</SERVICE_TYPE>\
             <SITENAME>{site}</SITENAME>{dn}<IN_PRODUCTION>Y</IN_PRODUCTION></SERVICE_ENDPOINT>\n",
            pk = e.primary_key,
            host = e.host,
            site = e.site,
            dn = e
                .dn
                .map(|dn| format!("<HOSTDN>{dn}</HOSTDN>"))
                .unwrap_or_default(),
        ));
    }
    xml.push_str("</results>\n");
    xml
}

fn site(production: &str, email: &str) -> String {
    format!(
        "<results><SITE NAME=\"x\"><CONTACT_EMAIL>{email}</CONTACT_EMAIL>\
         <PRODUCTION_INFRASTRUCTURE>{production}</PRODUCTION_INFRASTRUCTURE>\
         <CERTIFICATION_STATUS>Certified</CERTIFICATION_STATUS></SITE></results>"
    )
}

fn user_name(host: &str, site: &str) -> String {
    format!(
        "{}---{}---{}",
        TYPE_TOPIC,
        host.replace('.', "-"),
        site.replace('.', "-")
    )
}

impl Harness {
    fn new(endpoints: &[Endpoint]) -> Self {
        let mut world = World::default();
        world
            .listings
            .insert(SERVICE_TYPE.to_owned(), listing(SERVICE_TYPE, endpoints));
        world
            .sites
            .insert("GRNET".to_owned(), site("Production", "admins@grnet.example.org"));
        world
            .sites
            .insert("TESTBED".to_owned(), site("Test", "lab@example.org"));
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    fn syncer(&self, topic_mode: TopicMode, dry_run: bool) -> Syncer {
        let world = self.world.clone();
        let http: BaseApiClient = ApiClientCoreMock::from(move |request: MockRequest| {
            let response = world.lock().unwrap().handle(&request);
            async move { response }.boxed()
        })
        .into();
        let registry = RegistryClient::new(
            http.clone(),
            "https://goc/endpoints?type={{service-type}}".into(),
            Some("https://goc/site?name={{sitename}}".into()),
        );
        let ams = AmsClient::new(http.clone(), "ams.example.org", "PROJECT", "amstoken");
        let authn = AuthnClient::new(http, "authn.example.org", "authntoken");
        let settings = SyncSettings {
            topic_mode,
            users_role: "publisher".into(),
            default_email: DEFAULT_EMAIL.into(),
            service_uuid: "service-uuid".into(),
            service_host: "msg.example.org".into(),
            dry_run,
        };
        Syncer::new(
            registry,
            ams,
            authn,
            Normalizer::new(RdnProfile::Extended),
            settings,
        )
    }

    async fn run(&self, topic_mode: TopicMode) -> SyncReport {
        self.syncer(topic_mode, false)
            .run(&[SERVICE_TYPE.to_owned()])
            .await
    }

    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }
}

const GOOD_DN: &str = "/DC=org/DC=terena/DC=tcs/C=GR/O=GRNET/CN=cloud.grnet.example.org";
const GOOD_CANONICAL: &str = "CN=cloud.grnet.example.org,O=GRNET,C=GR,DC=org+DC=terena+DC=tcs";

fn grnet_endpoint() -> Endpoint<'static> {
    Endpoint {
        host: "cloud.grnet.example.org",
        site: "GRNET",
        primary_key: "101G0",
        dn: Some(GOOD_DN),
    }
}

#[tokio::test]
async fn provisions_users_bindings_and_endpoint_topics() {
    let harness = Harness::new(&[
        grnet_endpoint(),
        Endpoint {
            host: "nodn.example.org",
            site: "GRNET",
            primary_key: "102G0",
            dn: None,
        },
        Endpoint {
            host: "broken.example.org",
            site: "GRNET",
            primary_key: "103G0",
            dn: Some("/C=PL/GRID"),
        },
    ]);
    let report = harness.run(TopicMode::Endpoint).await;

    let user = user_name("cloud.grnet.example.org", "GRNET");
    let type_report = &report.service_types[0];
    assert_eq!(type_report.endpoints, 3);
    assert_eq!(type_report.missing_dns, ["nodn.example.org"]);
    assert_eq!(type_report.invalid_dns.len(), 1);
    assert_eq!(type_report.invalid_dns[0].hostname, "broken.example.org");
    assert_eq!(type_report.users_created, [user.clone()]);
    assert_eq!(type_report.bindings_created, [user.clone()]);
    assert!(type_report.failed.is_empty());
    assert!(!report.has_fetch_errors());

    let world = harness.world();
    let ams_user = &world.users[&user];
    assert_eq!(ams_user.email, "admins@grnet.example.org");
    let binding = &world.bindings[&user];
    assert_eq!(binding["auth_identifier"], GOOD_CANONICAL);
    assert_eq!(binding["unique_key"], ams_user.uuid.as_str());
    assert_eq!(binding["service_uuid"], "service-uuid");
    assert_eq!(binding["host"], "msg.example.org");
    assert_eq!(binding["auth_type"], "x509");
    assert_eq!(world.topics["SITE_GRNET_ENDPOINT_101G0"], [user]);
    assert_eq!(world.users.len(), 1);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let harness = Harness::new(&[grnet_endpoint()]);
    harness.run(TopicMode::Endpoint).await;
    let writes = harness.world().writes();

    let report = harness.run(TopicMode::Endpoint).await;
    let type_report = &report.service_types[0];
    assert!(type_report.users_created.is_empty());
    assert!(type_report.bindings_created.is_empty());
    assert!(type_report.bindings_updated.is_empty());
    assert!(type_report.acl_changes.is_empty());

    // only the create attempts that came back 409
    let world = harness.world();
    let new_writes: Vec<_> = world
        .requests
        .iter()
        .filter(|(method, _)| *method != Method::GET)
        .skip(writes)
        .map(|(method, _)| method.clone())
        .collect();
    assert_eq!(new_writes, [Method::POST, Method::POST, Method::PUT]);
}

#[tokio::test]
async fn stale_binding_is_updated() {
    let harness = Harness::new(&[grnet_endpoint()]);
    let user = user_name("cloud.grnet.example.org", "GRNET");
    {
        let mut world = harness.world();
        world.users.insert(
            user.clone(),
            User {
                uuid: "uuid-old".into(),
                email: DEFAULT_EMAIL.into(),
            },
        );
        world.bindings.insert(
            user.clone(),
            json!({
                "name": user, "service_uuid": "service-uuid", "host": "msg.example.org",
                "auth_identifier": "CN=cloud.grnet.example.org,O=OLD", "unique_key": "uuid-old",
                "auth_type": "x509", "uuid": "b-1", "created_on": "2019-01-01T00:00:00Z",
            }),
        );
    }

    let report = harness.run(TopicMode::Endpoint).await;
    let type_report = &report.service_types[0];
    assert!(type_report.users_created.is_empty());
    assert_eq!(type_report.bindings_updated, [user.clone()]);

    let world = harness.world();
    assert_eq!(world.bindings[&user]["auth_identifier"], GOOD_CANONICAL);
    assert_eq!(world.bindings[&user]["unique_key"], "uuid-old");
    assert_eq!(world.bindings[&user]["uuid"], "b-1");
}

#[tokio::test]
async fn rejected_binding_rolls_back_new_user() {
    let harness = Harness::new(&[grnet_endpoint()]);
    let user = user_name("cloud.grnet.example.org", "GRNET");
    harness.world().rejected_bindings.insert(user.clone());

    let report = harness.run(TopicMode::Endpoint).await;
    let type_report = &report.service_types[0];
    assert_eq!(type_report.failed, [user.clone()]);
    assert!(type_report.users_created.is_empty());

    let world = harness.world();
    assert!(world.users.is_empty());
    assert!(world.topics.is_empty());
    assert!(world
        .requests
        .iter()
        .any(|(method, url)| *method == Method::DELETE && url.contains(&user)));
}

#[tokio::test]
async fn rejected_binding_keeps_existing_user() {
    let harness = Harness::new(&[grnet_endpoint()]);
    let user = user_name("cloud.grnet.example.org", "GRNET");
    {
        let mut world = harness.world();
        world.rejected_bindings.insert(user.clone());
        world.users.insert(
            user.clone(),
            User {
                uuid: "uuid-old".into(),
                email: DEFAULT_EMAIL.into(),
            },
        );
    }

    let report = harness.run(TopicMode::Endpoint).await;
    assert_eq!(report.service_types[0].failed, [user.clone()]);
    let world = harness.world();
    assert!(world.users.contains_key(&user));
    assert!(!world
        .requests
        .iter()
        .any(|(method, _)| *method == Method::DELETE));
}

#[tokio::test]
async fn dn_bound_under_other_name_fails_endpoint() {
    let harness = Harness::new(&[grnet_endpoint()]);
    let user = user_name("cloud.grnet.example.org", "GRNET");
    harness.world().bindings.insert(
        "renamed-binding".into(),
        json!({"name": "renamed-binding", "auth_identifier": GOOD_CANONICAL}),
    );

    let report = harness.run(TopicMode::Endpoint).await;
    let type_report = &report.service_types[0];
    assert_eq!(type_report.failed, [user.clone()]);
    assert!(type_report.bindings_created.is_empty());
    assert!(type_report.users_created.is_empty());

    let world = harness.world();
    assert!(!world.bindings.contains_key(&user));
    assert!(world.users.is_empty());
    assert!(world.topics.is_empty());
}

#[tokio::test]
async fn registry_dn_without_leading_slash_is_invalid() {
    let harness = Harness::new(&[
        Endpoint {
            host: "noslash.example.org",
            site: "GRNET",
            primary_key: "401G0",
            dn: Some("C=PL/O=GRID/CN=noslash.example.org"),
        },
        Endpoint {
            host: "fragment.example.org",
            site: "GRNET",
            primary_key: "402G0",
            dn: Some("DC=org/DC=terena/DC=tcs/GRID"),
        },
    ]);
    let report = harness.run(TopicMode::Endpoint).await;

    let invalid = &report.service_types[0].invalid_dns;
    assert_eq!(invalid.len(), 2);
    assert_eq!(invalid[0].hostname, "noslash.example.org");
    assert!(invalid[0].reason.contains("must start with '/'"));
    assert_eq!(invalid[1].hostname, "fragment.example.org");
    assert!(invalid[1].reason.contains("\"GRID\""));
    assert!(harness.world().bindings.is_empty());
    assert_eq!(harness.world().writes(), 0);
}

#[tokio::test]
async fn existing_endpoint_topic_acl_is_extended() {
    let harness = Harness::new(&[grnet_endpoint()]);
    let user = user_name("cloud.grnet.example.org", "GRNET");
    harness.world().topics.insert(
        "SITE_GRNET_ENDPOINT_101G0".into(),
        vec!["someone-else".into()],
    );

    let report = harness.run(TopicMode::Endpoint).await;
    assert_eq!(report.service_types[0].acl_changes[0].added, [user.clone()]);
    assert_eq!(
        harness.world().topics["SITE_GRNET_ENDPOINT_101G0"],
        ["someone-else".to_owned(), user]
    );
}

#[tokio::test]
async fn service_type_topic_gets_union_of_users() {
    let harness = Harness::new(&[
        grnet_endpoint(),
        Endpoint {
            host: "lab.example.org",
            site: "TESTBED",
            primary_key: "201G0",
            dn: Some("/C=PL/O=GRID/OU=OU/CN=lab.example.org"),
        },
    ]);
    let grnet_user = user_name("cloud.grnet.example.org", "GRNET");
    let lab_user = user_name("lab.example.org", "TESTBED");
    harness.world().topics.insert(
        TYPE_TOPIC.into(),
        vec!["someone-else".into(), grnet_user.clone()],
    );

    let report = harness.run(TopicMode::ServiceType).await;
    let type_report = &report.service_types[0];
    assert_eq!(type_report.users_created.len(), 2);
    assert_eq!(type_report.acl_changes.len(), 1);
    assert_eq!(type_report.acl_changes[0].added, [lab_user.clone()]);

    let world = harness.world();
    assert_eq!(
        world.topics[TYPE_TOPIC],
        ["someone-else".to_owned(), grnet_user, lab_user.clone()]
    );
    // no per-endpoint topics in this mode
    assert_eq!(world.topics.len(), 1);
    // TESTBED isn't a production site
    assert_eq!(world.users[&lab_user].email, DEFAULT_EMAIL);
    assert_eq!(
        world.bindings[&lab_user]["auth_identifier"],
        "CN=lab.example.org,OU=OU,O=GRID,C=PL"
    );
}

#[tokio::test]
async fn missing_service_type_topic_is_not_fatal() {
    let harness = Harness::new(&[grnet_endpoint()]);
    let report = harness.run(TopicMode::ServiceType).await;
    let type_report = &report.service_types[0];
    assert_eq!(type_report.users_created.len(), 1);
    assert!(type_report.acl_changes.is_empty());
    assert!(type_report.failed.is_empty());
}

#[tokio::test]
async fn unavailable_listing_skips_service_type() {
    let harness = Harness::new(&[grnet_endpoint()]);
    let report = harness
        .syncer(TopicMode::Endpoint, false)
        .run(&["org.openstack.nova".to_owned(), SERVICE_TYPE.to_owned()])
        .await;

    assert!(report.has_fetch_errors());
    assert!(report.service_types[0].fetch_error.is_some());
    assert_eq!(report.service_types[1].users_created.len(), 1);
}

#[tokio::test]
async fn dry_run_only_reads() {
    let harness = Harness::new(&[
        grnet_endpoint(),
        Endpoint {
            host: "other.example.org",
            site: "NOWHERE",
            primary_key: "301 G0",
            dn: Some("/C=PL/O=GRID/CN=service/other.example.org/emailAddress=a@example.org"),
        },
    ]);
    let report = harness
        .syncer(TopicMode::Endpoint, true)
        .run(&[SERVICE_TYPE.to_owned()])
        .await;

    assert!(report.dry_run);
    let planned = &report.service_types[0].planned;
    assert_eq!(planned.len(), 2);
    assert_eq!(planned[0].dn, GOOD_CANONICAL);
    assert_eq!(planned[0].email, "admins@grnet.example.org");
    assert_eq!(planned[0].topic, "SITE_GRNET_ENDPOINT_101G0");
    assert_eq!(
        planned[1].dn,
        "E=a@example.org,CN=service/other.example.org,O=GRID,C=PL"
    );
    assert_eq!(planned[1].email, DEFAULT_EMAIL);
    assert_eq!(planned[1].topic, "SITE_NOWHERE_ENDPOINT_301G0");

    let world = harness.world();
    assert_eq!(world.writes(), 0);
    assert!(world.users.is_empty());
    assert!(world.requests.iter().all(|(_, url)| url.starts_with("https://goc/")));
}
