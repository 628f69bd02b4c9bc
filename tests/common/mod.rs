//! Shared fixtures: a fake peer network and a dial stage that talks to it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use connheal::{
    CallContext, Chain, ChainError, ClientConn, Connection, ConnectionEvent, Element, EventStream,
    HealBuilder, HealClient, HealConfig, MonitorConnection, MonitorFanout, MonitorScope, Next,
    ServiceRequest,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How peers answer pings for a connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Fail,
    Hang,
}

/// Everything the fake peers share, plus call counters for assertions.
pub struct Network {
    upstream: mpsc::Sender<ConnectionEvent>,
    fanout: MonitorFanout,
    health: Mutex<HashMap<String, Health>>,
    refuse_monitor: AtomicBool,
    ended_streams: AtomicBool,
    dial_gate: Mutex<Option<Arc<Notify>>>,
    refused_dials: Mutex<HashMap<String, u32>>,
    requests: Mutex<HashMap<String, usize>>,
    closes: Mutex<HashMap<String, usize>>,
    pings: Mutex<HashMap<String, usize>>,
    tenants: Mutex<Vec<(String, Option<String>)>>,
    generation: AtomicU64,
}

impl Network {
    pub fn new() -> Arc<Self> {
        let (upstream, rx) = mpsc::channel(64);
        Arc::new(Self {
            upstream,
            fanout: MonitorFanout::new(rx),
            health: Mutex::new(HashMap::new()),
            refuse_monitor: AtomicBool::new(false),
            ended_streams: AtomicBool::new(false),
            dial_gate: Mutex::new(None),
            refused_dials: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            closes: Mutex::new(HashMap::new()),
            pings: Mutex::new(HashMap::new()),
            tenants: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn set_health(&self, id: &str, health: Health) {
        self.health.lock().unwrap().insert(id.to_string(), health);
    }

    pub fn refuse_monitor(&self, refuse: bool) {
        self.refuse_monitor.store(refuse, Ordering::SeqCst);
    }

    /// Peers hand out event streams that are already over.
    pub fn end_streams(&self, ended: bool) {
        self.ended_streams.store(ended, Ordering::SeqCst);
    }

    /// Dials from now on wait for one `notify_one` each before connecting.
    pub fn hold_dials(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.dial_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// The next `n` dials for `id` fail.
    pub fn refuse_dials(&self, id: &str, n: u32) {
        self.refused_dials.lock().unwrap().insert(id.to_string(), n);
    }

    pub async fn publish(&self, ev: ConnectionEvent) {
        self.upstream.send(ev).await.unwrap();
    }

    pub fn requests(&self, id: &str) -> usize {
        count(&self.requests, id)
    }

    pub fn closes(&self, id: &str) -> usize {
        count(&self.closes, id)
    }

    pub fn pings(&self, id: &str) -> usize {
        count(&self.pings, id)
    }

    /// `tenant` value seen by each dial, in call order.
    pub fn tenants(&self, id: &str) -> Vec<Option<String>> {
        self.tenants
            .lock()
            .unwrap()
            .iter()
            .filter(|(conn_id, _)| conn_id == id)
            .map(|(_, tenant)| tenant.clone())
            .collect()
    }

    pub async fn subscribers(&self) -> usize {
        self.fanout.subscriber_count().await
    }

    fn health_of(&self, id: &str) -> Health {
        self.health
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(Health::Healthy)
    }

    fn take_refusal(&self, id: &str) -> bool {
        let mut refused = self.refused_dials.lock().unwrap();
        match refused.get_mut(id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

fn count(map: &Mutex<HashMap<String, usize>>, id: &str) -> usize {
    map.lock().unwrap().get(id).copied().unwrap_or(0)
}

fn bump(map: &Mutex<HashMap<String, usize>>, id: &str) {
    *map.lock().unwrap().entry(id.to_string()).or_default() += 1;
}

/// One established peer connection.
pub struct Peer {
    conn_id: String,
    target: String,
    net: Arc<Network>,
}

#[async_trait]
impl MonitorConnection for Peer {
    async fn monitor_connections(
        &self,
        token: CancellationToken,
        _scope: MonitorScope,
    ) -> Result<EventStream, ChainError> {
        if self.net.refuse_monitor.load(Ordering::SeqCst) {
            return Err(ChainError::remote("monitor refused"));
        }
        if self.net.ended_streams.load(Ordering::SeqCst) {
            let (_tx, ended) = EventStream::channel(1);
            return Ok(ended);
        }
        Ok(self.net.fanout.subscribe(token))
    }
}

#[async_trait]
impl ClientConn for Peer {
    fn target(&self) -> &str {
        &self.target
    }

    async fn ping(&self) -> Result<(), ChainError> {
        bump(&self.net.pings, &self.conn_id);
        match self.net.health_of(&self.conn_id) {
            Health::Healthy => Ok(()),
            Health::Fail => Err(ChainError::remote("ping refused")),
            Health::Hang => futures::future::pending().await,
        }
    }
}

/// Last pipeline stage: "dials" a peer and leaves it in the context.
pub struct Dial {
    net: Arc<Network>,
}

#[async_trait]
impl Element for Dial {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        let id = request.connection.id.clone();
        bump(&self.net.requests, &id);
        let tenant = ctx.values().get("tenant").map(str::to_owned);
        self.net.tenants.lock().unwrap().push((id.clone(), tenant));

        let gate = self.net.dial_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.net.take_refusal(&id) {
            return Err(ChainError::remote(format!("dial {id} refused")));
        }

        let generation = self.net.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = next
            .request(ctx, request)
            .await?
            .with_label("generation", generation.to_string());
        ctx.set_client_conn(Arc::new(Peer {
            conn_id: id,
            target: format!("peer-{generation}"),
            net: Arc::clone(&self.net),
        }));
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        bump(&self.net.closes, &conn.id);
        next.close(ctx, conn).await
    }
}

/// `[HealClient, Dial]` wired together.
pub struct Harness {
    pub chain: Arc<Chain>,
    pub heal: Arc<HealClient>,
    pub net: Arc<Network>,
    pub token: CancellationToken,
}

impl Harness {
    pub fn new(cfg: HealConfig) -> Self {
        Self::with(|b| b.with_config(cfg))
    }

    pub fn with(configure: impl FnOnce(HealBuilder) -> HealBuilder) -> Self {
        init_tracing();
        let net = Network::new();
        let token = CancellationToken::new();

        let mut heal_slot = None;
        let chain = Chain::build(|pipeline| {
            let heal = configure(HealClient::builder(token.clone(), Arc::new(pipeline))).build();
            heal_slot = Some(Arc::clone(&heal));
            let stages: Vec<Arc<dyn Element>> = vec![
                heal,
                Arc::new(Dial {
                    net: Arc::clone(&net),
                }),
            ];
            stages
        });

        Self {
            chain,
            heal: heal_slot.expect("heal element built"),
            net,
            token,
        }
    }
}

pub fn request_for(id: &str) -> ServiceRequest {
    ServiceRequest::new(Connection::new(id, "svc"))
}

/// Polls `cond` every millisecond until it holds; panics after `limit`.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {limit:?}");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
