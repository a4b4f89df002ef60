#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use carbotax::clock::{Clock, Interrupt, ManualClock};
use carbotax::config::Settings;
use carbotax::error::CarbotaxError;
use carbotax::ontology::{OntologyClient, OntologyRelation, collect_ancestors};
use carbotax::transport::{HttpResponse, Request, Transport};

pub const DB: &str = "http://db.test";
pub const ONTO: &str = "http://onto.test";

/// Settings pointing at the scripted hosts, with no rate-limit delay so the
/// recorded sleeps are retry and cooldown sleeps only.
pub fn test_settings(dir: &Utf8Path) -> Settings {
    let mut settings = Settings::default();
    settings.database_base_url = DB.to_string();
    settings.ontology_base_url = ONTO.to_string();
    settings.rate_limit.initial_delay_secs = 0.0;
    settings.rate_limit.min_delay_secs = 0.0;
    settings.cache.dir = dir.join("cache");
    settings.failed_dir = Some(dir.join("failed"));
    settings
}

pub fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

pub fn fixture(name: &str) -> Value {
    let raw = std::fs::read_to_string(format!("tests/fixtures/{name}")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Virtual clock that fires `interrupt` during its `trigger_on`-th sleep,
/// the way Ctrl-C lands while the worker is waiting.
pub struct InterruptingClock {
    manual: ManualClock,
    interrupt: Interrupt,
    trigger_on: usize,
}

impl InterruptingClock {
    pub fn new(interrupt: Interrupt, trigger_on: usize) -> Self {
        Self {
            manual: ManualClock::new(),
            interrupt,
            trigger_on,
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.manual.sleeps()
    }
}

impl Clock for InterruptingClock {
    fn now(&self) -> Instant {
        self.manual.now()
    }

    fn sleep(&self, duration: Duration) {
        self.manual.sleep(duration);
        if self.manual.sleeps().len() == self.trigger_on {
            self.interrupt.trigger();
        }
    }

    fn check_interrupt(&self) -> Result<(), CarbotaxError> {
        self.interrupt.check()
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Timeout,
}

#[derive(Default)]
struct Script {
    routes: HashMap<String, VecDeque<Reply>>,
    calls: Vec<Request>,
}

/// Transport double answering by exact URL. The last reply queued for a URL
/// repeats; unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, url: &str, status: u16, body: impl Into<String>) {
        self.push(url, Reply::Status(status, body.into()));
    }

    pub fn reply_json(&self, url: &str, body: &Value) {
        self.reply(url, 200, body.to_string());
    }

    pub fn timeout(&self, url: &str) {
        self.push(url, Reply::Timeout);
    }

    pub fn calls(&self) -> Vec<Request> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|call| call.url() == url).count()
    }

    fn push(&self, url: &str, reply: Reply) {
        self.script
            .lock()
            .unwrap()
            .routes
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &Request) -> Result<HttpResponse, CarbotaxError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(request.clone());
        let reply = match script.routes.get_mut(request.url()) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match reply {
            Some(Reply::Status(status, body)) => Ok(HttpResponse { status, body }),
            Some(Reply::Timeout) => Err(CarbotaxError::Timeout(request.url().to_string())),
            None => Ok(HttpResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

pub fn relation(child: u64, child_name: &str, parent: u64, parent_name: &str) -> OntologyRelation {
    OntologyRelation {
        child_id: child,
        child_name: child_name.to_string(),
        relation_kind: "is a".to_string(),
        parent_id: parent,
        parent_name: parent_name.to_string(),
    }
}

/// In-memory "is a" graph.
#[derive(Default)]
pub struct GraphOntology {
    edges: Vec<OntologyRelation>,
    failing: HashSet<u64>,
    pub parent_lookups: usize,
    pub persisted: usize,
}

impl GraphOntology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge(mut self, child: u64, child_name: &str, parent: u64, parent_name: &str) -> Self {
        self.edges.push(relation(child, child_name, parent, parent_name));
        self
    }

    /// Ancestor lookups for `id` fail with a server error.
    pub fn failing(mut self, id: u64) -> Self {
        self.failing.insert(id);
        self
    }
}

impl OntologyClient for GraphOntology {
    fn children(&mut self, id: u64) -> Vec<OntologyRelation> {
        self.edges
            .iter()
            .filter(|edge| edge.parent_id == id)
            .cloned()
            .collect()
    }

    fn parents(&mut self, id: u64) -> Vec<OntologyRelation> {
        self.parent_lookups += 1;
        self.edges
            .iter()
            .filter(|edge| edge.child_id == id)
            .cloned()
            .collect()
    }

    fn ancestors(&mut self, id: u64) -> Result<Vec<u64>, CarbotaxError> {
        if self.failing.contains(&id) {
            return Err(CarbotaxError::Status {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        collect_ancestors(self, id, 20)
    }

    fn persist(&mut self) {
        self.persisted += 1;
    }
}

/// The carbohydrate corner of the ontology used across tests.
///
/// root 78616
/// ├── carbohydrate 16646
/// │   ├── monosaccharide 35381 (main group: two children)
/// │   │   ├── aldose 15693 ── glucose 17234 ── D-glucose 4167
/// │   │   └── ketose 24973
/// │   └── carbohydrate acid 33720 (single child)
/// │       └── aldonic acid 33792
/// ├── carbohydrate derivative 63299
/// │   ├── glycoside 24400 (main group)
/// │   │   ├── O-glycoside 25541
/// │   │   └── N-glycoside 21731
/// │   └── carbohydrate phosphate 26816
/// └── carbohydrate-related compound 99999
pub fn carbohydrate_graph() -> GraphOntology {
    GraphOntology::new()
        .edge(16646, "carbohydrate", 78616, "carbohydrates and carbohydrate derivatives")
        .edge(63299, "carbohydrate derivative", 78616, "carbohydrates and carbohydrate derivatives")
        .edge(99999, "carbohydrate-related compound", 78616, "carbohydrates and carbohydrate derivatives")
        .edge(35381, "monosaccharide", 16646, "carbohydrate")
        .edge(33720, "carbohydrate acid", 16646, "carbohydrate")
        .edge(15693, "aldose", 35381, "monosaccharide")
        .edge(24973, "ketose", 35381, "monosaccharide")
        .edge(33792, "aldonic acid", 33720, "carbohydrate acid")
        .edge(17234, "glucose", 15693, "aldose")
        .edge(4167, "D-glucose", 17234, "glucose")
        .edge(24400, "glycoside", 63299, "carbohydrate derivative")
        .edge(26816, "carbohydrate phosphate", 63299, "carbohydrate derivative")
        .edge(25541, "O-glycoside", 24400, "glycoside")
        .edge(21731, "N-glycoside", 24400, "glycoside")
}
