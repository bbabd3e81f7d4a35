//! Application lifecycle: demo login followed by a demo world loop.
//!
//! The demo stands up an in-process cluster on the loopback fabric, logs a
//! client in through the full two-phase pipeline (including a challenge if
//! one is configured), then runs a witness over a world of wandering
//! entities for the configured number of ticks, acting as its own client:
//! every `EnterAoi` in a bundle is answered with an update request on the
//! next tick, exactly as a real client would.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use farsight_aoi::{AoiListener, AoiRoot, Entity, SpaceDataStore, Vec3, Witness, World};
use farsight_connection::challenge::ChallengeFactoryRegistry;
use farsight_connection::loopback::LoopbackFabric;
use farsight_connection::sim::{SimBaseApp, SimLoginApp};
use farsight_connection::{
    LogOnParams, LoginHandler, NullCipher, ParamsCipher, ServerConnection, ThreadExecutor,
};
use farsight_wire::{ClientMessage, NetAddress, SessionKey};

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::{logging, signals};

const PLAYER_ID: u32 = 1;
const LOGIN_SESSION_KEY: SessionKey = 0x5EED_0001;
const BASE_SESSION_KEY: SessionKey = 0x5EED_0002;

/// Listener that counts AoI churn for the end-of-run summary.
struct CountingListener {
    entered: Arc<AtomicU64>,
    left: Arc<AtomicU64>,
}

impl AoiListener for CountingListener {
    fn on_entered_aoi(&mut self, _owner: u32, entity: u32) {
        self.entered.fetch_add(1, Ordering::Relaxed);
        debug!(entity, "entered AoI");
    }

    fn on_left_aoi(&mut self, _owner: u32, entity: u32) {
        self.left.fetch_add(1, Ordering::Relaxed);
        debug!(entity, "left AoI");
    }
}

pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(args: &CliArgs, mut config: AppConfig) -> Result<Self> {
        if let Some(ticks) = args.ticks {
            config.demo.ticks = ticks;
        }
        if let Some(entities) = args.entities {
            config.demo.entities = entities;
        }
        config.validate()?;
        Ok(Self { config })
    }

    pub async fn run(self) -> Result<()> {
        logging::display_banner();

        let session_key = self.run_login().await?;

        tokio::select! {
            result = self.run_world(session_key) => result,
            result = signals::wait_for_shutdown() => result,
        }
    }

    /// Logs the demo account in against an in-process login and base
    /// application pair.
    async fn run_login(&self) -> Result<SessionKey> {
        let fabric = LoopbackFabric::new();
        let registry = Arc::new(ChallengeFactoryRegistry::with_defaults(&self.config.challenge));
        let cipher: Arc<dyn ParamsCipher> = Arc::new(NullCipher);

        let login_addr = NetAddress::new(Ipv4Addr::new(10, 0, 0, 1), 20013);
        let base_addr = NetAddress::new(Ipv4Addr::new(10, 0, 0, 2), 40000);

        let mut login_app = SimLoginApp::new(
            Arc::clone(&registry),
            Arc::clone(&cipher),
            base_addr,
            LOGIN_SESSION_KEY,
        );
        login_app.add_account("demo", "demo");
        if !self.config.challenge.challenge_type.is_empty() {
            info!(
                challenge = %self.config.challenge.challenge_type,
                "login application will issue challenges"
            );
            login_app.require_challenge(&self.config.challenge.challenge_type);
        }
        login_app.bind(&fabric, login_addr);
        SimBaseApp::new(LOGIN_SESSION_KEY, BASE_SESSION_KEY).bind(&fabric, base_addr);

        let mut conn = ServerConnection::new(
            self.config.login.clone(),
            Box::new(fabric.factory()),
            registry,
            Box::new(ThreadExecutor),
            cipher,
        );
        let mut handler = LoginHandler::new(LogOnParams::new("demo", "demo"), login_addr);
        handler.start(&mut conn, Instant::now())?;

        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        while !handler.is_done() {
            ticker.tick().await;
            handler.poll(&mut conn, Instant::now())?;
        }
        if !handler.status().succeeded() {
            bail!("demo login failed: {}", handler.status());
        }
        info!(
            session_key = conn.session_key(),
            base_app = %handler.base_app_addr(),
            "demo client logged on"
        );
        Ok(conn.session_key())
    }

    /// Runs the witness over a world of wandering entities.
    async fn run_world(&self, _session_key: SessionKey) -> Result<()> {
        let demo = &self.config.demo;
        let mut rng = StdRng::seed_from_u64(demo.seed);

        let mut world = World::new();
        let mut player = Entity::new(PLAYER_ID, 0, Vec3::new(0.0, 0.0, 0.0));
        player.is_volatile = true;
        world.insert(player);
        for i in 0..demo.entities {
            let id = PLAYER_ID + 1 + i;
            let pos = Vec3::new(
                rng.gen_range(-1000.0..1000.0),
                0.0,
                rng.gen_range(-1000.0..1000.0),
            );
            let mut entity = Entity::new(id, 1, pos);
            entity.is_volatile = rng.gen_bool(0.8);
            world.insert(entity);
        }

        let entered = Arc::new(AtomicU64::new(0));
        let left = Arc::new(AtomicU64::new(0));
        let listener = CountingListener {
            entered: Arc::clone(&entered),
            left: Arc::clone(&left),
        };
        let mut witness = Witness::new(PLAYER_ID, self.config.aoi.clone(), Box::new(listener));
        witness.set_witness_capacity(demo.client_bps);
        witness.set_aoi_root(&world, AoiRoot::Entity(PLAYER_ID));

        let mut space_data = SpaceDataStore::new();
        space_data.add(0, 1, b"weather=clear".to_vec());

        let tick_interval =
            Duration::from_millis(1000 / u64::from(self.config.aoi.ticks_per_second.max(1)));
        let mut ticker = tokio::time::interval(tick_interval);

        let mut total_bytes: u64 = 0;
        let mut pending_requests: Vec<u32> = Vec::new();

        info!(
            entities = demo.entities,
            ticks = demo.ticks,
            packet_size = witness.packet_size(),
            "starting demo world loop"
        );

        for tick in 0..demo.ticks {
            ticker.tick().await;

            // Wander everyone a little; touch properties now and then.
            let ids: Vec<u32> = world.ids().collect();
            for id in ids {
                if let Some(entity) = world.get_mut(id) {
                    entity.position.x += rng.gen_range(-2.0..2.0);
                    entity.position.z += rng.gen_range(-2.0..2.0);
                }
                if rng.gen_bool(0.05) {
                    let payload = vec![rng.gen::<u8>(); 24];
                    world.set_properties(id, payload);
                }
            }
            if tick == demo.ticks / 2 {
                space_data.add(0, 1, b"weather=rain".to_vec());
            }

            // Play the client's part for entities announced last tick.
            for id in pending_requests.drain(..) {
                if witness.is_in_aoi(id) {
                    let _ = witness.request_entity_update(&world, id, None);
                }
            }

            let bundle = witness.update(&world, &space_data)?;
            for msg in bundle.messages() {
                match msg {
                    ClientMessage::EnterAoi { id, .. }
                    | ClientMessage::EnterAoiOnVehicle { id, .. } => pending_requests.push(*id),
                    _ => {}
                }
            }
            total_bytes += bundle.size() as u64;

            if tick % 10 == 0 {
                debug!(
                    tick,
                    aoi_size = witness.aoi_size(),
                    bundle_bytes = bundle.size(),
                    deficit = witness.bandwidth_deficit(),
                    "tick complete"
                );
            }
        }

        info!(
            ticks = demo.ticks,
            aoi_size = witness.aoi_size(),
            entered = entered.load(Ordering::Relaxed),
            left = left.load(Ordering::Relaxed),
            total_bytes,
            "demo finished"
        );
        Ok(())
    }
}
