//! Mixer recovery. Driver controls can register after the route graph was
//! first built; until they do the graph is reopened on every control-add
//! event, giving up once no event has arrived for a while.

use super::{DeviceProxy, MixerState, lock};
use crate::hw::AudioBackend;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const EVENT_WAIT: Duration = Duration::from_secs(1);
const MIXER_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

fn recovery_loop(shared: Arc<RwLock<MixerState>>, backend: Arc<dyn AudioBackend>, card: u32) {
    info!("started running Mixer Updater Thread");
    let started = Instant::now();
    loop {
        let current = shared
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .mixer
            .clone();
        let Some(current) = current else {
            break;
        };
        debug!("wait add event");
        match current.wait_event(EVENT_WAIT) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                if started.elapsed() > MIXER_UPDATE_TIMEOUT {
                    info!("Mixer Update Timeout, it will be destroyed");
                    break;
                }
                continue;
            }
        }

        let mut state = shared.write().unwrap_or_else(|e| e.into_inner());
        state.route = None;
        state.mixer = match backend.open_mixer(card) {
            Ok(mixer) => {
                if let Err(e) = mixer.subscribe_events(true) {
                    error!("mixer event subscription failed: {e}");
                }
                Some(mixer)
            }
            Err(e) => {
                error!("failed to re-open Mixer: {e}");
                None
            }
        };
        if let (Some(mixer), Some(xml)) = (state.mixer.clone(), state.xml_path.clone()) {
            match backend.open_route(mixer, card, &xml) {
                Ok(route) => state.route = Some(route),
                Err(e) => error!("failed to re-init audio route: {e}"),
            }
        }
        info!("mixer and route are updated");

        let missing = matches!(
            (&state.mixer, &state.route),
            (Some(_), Some(route)) if route.missing_controls()
        );
        if !missing {
            break;
        }
    }
    info!("all mixer controls are found");

    let mixer = shared
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .mixer
        .clone();
    if let Some(mixer) = mixer {
        if let Err(e) = mixer.subscribe_events(false) {
            error!("mixer event unsubscription failed: {e}");
        }
    }
    info!("stopped running Mixer Updater Thread");
}

impl DeviceProxy {
    pub(super) fn spawn_recovery(&self) {
        self.join_recovery();
        let shared = self.mixer.clone();
        let backend = self.backend.clone();
        let card = self.options.mixer_card;
        let spawned = thread::Builder::new()
            .name("abox-mixer-update".to_string())
            .spawn(move || recovery_loop(shared, backend, card));
        match spawned {
            Ok(handle) => *lock(&self.recovery) = Some(handle),
            Err(e) => error!("failed to create mixer update thread: {e}"),
        }
    }

    pub(super) fn join_recovery(&self) {
        let handle = lock(&self.recovery).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("mixer update thread panicked");
            }
        }
    }

    pub fn is_recovery_running(&self) -> bool {
        lock(&self.recovery)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{FakeConnector, MIXER_PATHS};
    use crate::device::controls;
    use crate::hw::memory::{MemoryBackend, MemoryMixer};
    use crate::hw::options::ProxyOptions;
    use std::path::Path;

    fn proxy(backend: &MemoryBackend) -> DeviceProxy {
        DeviceProxy::new(
            Arc::new(backend.clone()),
            ProxyOptions::default(),
            Arc::new(FakeConnector(None)),
        )
    }

    #[test]
    fn add_event_rebuilds_the_route_graph() {
        let backend = MemoryBackend::with_mixer(MemoryMixer::default());
        backend.set_missing_route_inits(1);
        backend.mixer().push_event();
        let proxy = proxy(&backend);

        assert!(proxy.init_route(Path::new(MIXER_PATHS)));
        proxy.join_recovery();

        assert!(!proxy.is_recovery_running());
        assert!(!backend.mixer().is_subscribed());
        let state = proxy.mixer_read();
        let route = state.route.as_ref().unwrap();
        assert!(!route.missing_controls());
        assert_eq!(state.xml_path.as_deref(), Some(Path::new(MIXER_PATHS)));
    }

    #[test]
    fn keeps_waiting_while_controls_are_missing() {
        let backend = MemoryBackend::with_mixer(MemoryMixer::default());
        backend.set_missing_route_inits(2);
        let mixer = backend.mixer();
        mixer.push_event();
        mixer.push_event();
        let proxy = proxy(&backend);

        assert!(proxy.init_route(Path::new(MIXER_PATHS)));
        proxy.join_recovery();

        // one rebuild still missed controls, the second found them all
        assert!(!proxy.mixer_read().route.as_ref().unwrap().missing_controls());
        assert_eq!(proxy.get_mixer_value_int(controls::TICKLE), controls::TICKLE_ON);
    }

    #[test]
    fn deinit_stops_the_thread() {
        let backend = MemoryBackend::with_mixer(MemoryMixer::default());
        backend.set_missing_route_inits(1);
        let proxy = proxy(&backend);
        assert!(proxy.init_route(Path::new(MIXER_PATHS)));
        proxy.deinit_route();
        proxy.join_recovery();
        assert!(!proxy.is_recovery_running());
        assert!(proxy.mixer_read().mixer.is_none());
    }
}
