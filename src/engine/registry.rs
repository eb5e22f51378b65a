//! Engine Registry
//!
//! Lazily constructs one engine per variant and keeps it for the life of the
//! process. Concurrent first requests for a variant share a single
//! construction (a "flight"); later requests only take a read lock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, VariantConfig};
use crate::engine::device::ComputeDevice;
use crate::engine::preprocess::PixelBuffer;
use crate::engine::traits::{EngineFactory, OcrEngine, RecognizeOptions, TextRegion};
use crate::error::OcrError;

type BuildOutcome = Result<Arc<EngineInstance>, OcrError>;

/// A constructed engine bound to one variant and the process device.
pub struct EngineInstance {
    variant: String,
    device: ComputeDevice,
    engine: Mutex<Box<dyn OcrEngine>>,
}

impl EngineInstance {
    fn new(variant: &str, device: ComputeDevice, engine: Box<dyn OcrEngine>) -> Self {
        Self {
            variant: variant.to_string(),
            device,
            engine: Mutex::new(engine),
        }
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Run the engine. Calls on the same instance are serialized.
    pub fn recognize(
        &self,
        image: &PixelBuffer,
        options: &RecognizeOptions,
    ) -> Result<Vec<TextRegion>, OcrError> {
        let mut engine = self.engine.lock();
        engine
            .recognize(image, options)
            .map_err(|e| OcrError::recognition(&self.variant, &e))
    }
}

impl fmt::Debug for EngineInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineInstance")
            .field("variant", &self.variant)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// One in-progress construction.
struct Flight {
    outcome: Mutex<Option<BuildOutcome>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, outcome: BuildOutcome) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> BuildOutcome {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

enum Slot {
    Ready(Arc<EngineInstance>),
    Building(Arc<Flight>),
}

enum Role {
    Leader(Arc<Flight>),
    Waiter(Arc<Flight>),
}

/// Load state of a configured variant.
#[derive(Debug, Clone, Serialize)]
pub struct VariantStatus {
    pub id: String,
    pub aliases: Vec<String>,
    pub loaded: bool,
    pub loading: bool,
}

/// Process-wide map from variant id to engine instance.
pub struct EngineRegistry {
    factory: Arc<dyn EngineFactory>,
    device: ComputeDevice,
    variants: BTreeMap<String, VariantConfig>,
    aliases: HashMap<String, String>,
    slots: RwLock<HashMap<String, Slot>>,
}

impl EngineRegistry {
    /// Create an empty registry. Nothing is constructed until requested.
    pub fn new(
        config: &Config,
        device: ComputeDevice,
        factory: Arc<dyn EngineFactory>,
    ) -> anyhow::Result<Self> {
        let aliases = config.alias_table()?;

        info!(
            "Engine registry ready: {} variant(s) on {}",
            config.variants.len(),
            device
        );

        Ok(Self {
            factory,
            device,
            variants: config.variants.clone(),
            aliases,
            slots: RwLock::new(HashMap::new()),
        })
    }

    /// Canonical ids of every configured variant, sorted.
    pub fn variant_ids(&self) -> Vec<String> {
        self.variants.keys().cloned().collect()
    }

    /// Map a variant id or alias to its canonical id.
    pub fn resolve(&self, requested: &str) -> Result<&str, OcrError> {
        self.aliases
            .get(requested)
            .map(String::as_str)
            .ok_or_else(|| OcrError::UnknownVariant {
                requested: requested.to_string(),
                known: self.variant_ids(),
            })
    }

    /// Return the engine for `requested`, constructing it on first use.
    pub fn get_or_create(&self, requested: &str) -> Result<Arc<EngineInstance>, OcrError> {
        let id = self.resolve(requested)?;

        // Fast path
        {
            let slots = self.slots.read();
            if let Some(Slot::Ready(instance)) = slots.get(id) {
                return Ok(instance.clone());
            }
        }

        let role = {
            let mut slots = self.slots.write();
            match slots.get(id) {
                Some(Slot::Ready(instance)) => return Ok(instance.clone()),
                Some(Slot::Building(flight)) => Role::Waiter(flight.clone()),
                None => {
                    let flight = Arc::new(Flight::new());
                    slots.insert(id.to_string(), Slot::Building(flight.clone()));
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Waiter(flight) => {
                debug!("Waiting for engine '{}' under construction", id);
                flight.wait()
            }
            Role::Leader(flight) => {
                let outcome = self.construct(id);
                self.finish(id, &flight, outcome.clone());
                outcome
            }
        }
    }

    fn construct(&self, id: &str) -> BuildOutcome {
        let config = self.variants.get(id).ok_or_else(|| OcrError::UnknownVariant {
            requested: id.to_string(),
            known: self.variant_ids(),
        })?;

        info!("Constructing engine for variant '{}' on {}...", id, self.device);
        let start = Instant::now();

        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            self.factory.build(id, config, self.device)
        }));

        let outcome = match built {
            Ok(Ok(engine)) => Ok(Arc::new(EngineInstance::new(id, self.device, engine))),
            Ok(Err(e)) => Err(OcrError::construction(id, &e)),
            Err(payload) => Err(OcrError::Construction {
                variant: id.to_string(),
                message: format!("engine construction panicked: {}", panic_message(&*payload)),
            }),
        };

        match &outcome {
            Ok(_) => info!("Engine '{}' ready in {:?}", id, start.elapsed()),
            Err(e) => warn!("{} (after {:?})", e, start.elapsed()),
        }
        outcome
    }

    /// Publish the outcome: map first, then wake waiters.
    fn finish(&self, id: &str, flight: &Flight, outcome: BuildOutcome) {
        {
            let mut slots = self.slots.write();
            match &outcome {
                Ok(instance) => {
                    slots.insert(id.to_string(), Slot::Ready(instance.clone()));
                }
                // Not cached; the next request retries.
                Err(_) => {
                    slots.remove(id);
                }
            }
        }
        flight.complete(outcome);
    }

    /// Load state of every configured variant.
    pub fn status(&self) -> Vec<VariantStatus> {
        let slots = self.slots.read();
        self.variants
            .iter()
            .map(|(id, variant)| VariantStatus {
                id: id.clone(),
                aliases: variant.aliases.clone(),
                loaded: matches!(slots.get(id), Some(Slot::Ready(_))),
                loading: matches!(slots.get(id), Some(Slot::Building(_))),
            })
            .collect()
    }

    /// Construct the listed variants now. Returns how many are ready.
    pub fn preload(&self, names: &[String]) -> usize {
        let mut ready = 0;
        for name in names {
            match self.get_or_create(name) {
                Ok(_) => ready += 1,
                Err(e) => warn!("Preload of '{}' failed, will retry on demand: {}", name, e),
            }
        }
        ready
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
