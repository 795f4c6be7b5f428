use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::Mutex, task::spawn_blocking, time::timeout};
use tracing::{trace, warn};

use crate::{
    device_record::DeviceRecord,
    dispatcher::{BatchOutcome, PowerLimitRequest, apply_mode},
    errors::PowerError,
    gateway::{DeviceGateway, GatewayError, PowerConstraints},
    inventory::InventoryCache,
};

pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

// Gateway wrapper counting the calls that returned
struct WatchedGateway {
    inner: Box<dyn DeviceGateway>,
    completed: Arc<AtomicU64>,
}

impl WatchedGateway {
    fn watch<T>(&self, result: T) -> T {
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

impl DeviceGateway for WatchedGateway {
    fn device_count(&self) -> Result<u32, GatewayError> {
        self.watch(self.inner.device_count())
    }

    fn name(&self, index: u32) -> Result<String, GatewayError> {
        self.watch(self.inner.name(index))
    }

    fn is_power_management_supported(
        &self,
        index: u32,
    ) -> Result<bool, GatewayError> {
        self.watch(self.inner.is_power_management_supported(index))
    }

    fn power_limit(&self, index: u32) -> Result<u32, GatewayError> {
        self.watch(self.inner.power_limit(index))
    }

    fn power_limit_constraints(
        &self,
        index: u32,
    ) -> Result<PowerConstraints, GatewayError> {
        self.watch(self.inner.power_limit_constraints(index))
    }

    fn power_usage(&self, index: u32) -> Result<u32, GatewayError> {
        self.watch(self.inner.power_usage(index))
    }

    fn set_power_limit(
        &mut self,
        index: u32,
        limit: u32,
    ) -> Result<(), GatewayError> {
        let result = self.inner.set_power_limit(index, limit);
        self.watch(result)
    }
}

struct ControllerState {
    gateway: WatchedGateway,
    cache: InventoryCache,
}

// Shared access to the GPUs and to the inventory cache.
// Gateway calls are blocking, they are all serialized behind a single
// lock and run on the blocking thread pool
#[derive(Clone)]
pub struct Controller {
    state: Arc<Mutex<ControllerState>>,
    completed_calls: Arc<AtomicU64>,
    call_timeout: Duration,
}

impl Controller {
    pub fn new(gateway: Box<dyn DeviceGateway>, call_timeout: Duration) -> Self {
        let completed_calls = Arc::new(AtomicU64::new(0));

        Self {
            state: Arc::new(Mutex::new(ControllerState {
                gateway: WatchedGateway {
                    inner: gateway,
                    completed: completed_calls.clone(),
                },
                cache: InventoryCache::new(),
            })),
            completed_calls,
            call_timeout,
        }
    }

    // Refresh the cache and return a copy of every record
    pub async fn refresh(&self) -> Result<Vec<DeviceRecord>, PowerError> {
        self.with_state(|state| -> Result<_, PowerError> {
            state.cache.refresh(&state.gateway)?;
            Ok(state.cache.records().to_vec())
        })
        .await?
    }

    // Refresh the cache and return the record of a single GPU
    pub async fn device(
        &self,
        index: u32,
    ) -> Result<Option<DeviceRecord>, PowerError> {
        self.with_state(move |state| -> Result<_, PowerError> {
            state.cache.refresh(&state.gateway)?;
            Ok(state.cache.get(index).cloned())
        })
        .await?
    }

    /// Apply a power limit request to the GPUs currently enumerated.
    ///
    /// The cache is refreshed afterward so that later reads see the new
    /// limits, a failing refresh at this point is only logged.
    pub async fn apply(
        &self,
        request: PowerLimitRequest,
    ) -> Result<BatchOutcome, PowerError> {
        request.mode()?;

        self.with_state(move |state| -> Result<_, PowerError> {
            let device_count = state
                .gateway
                .device_count()
                .map_err(PowerError::DeviceCount)?;

            let outcome =
                apply_mode(&mut state.gateway, &request, device_count)?;

            if let Err(err) = state.cache.refresh(&state.gateway) {
                warn!("Failed to refresh GPU cache: {}", err);
            }

            Ok(outcome)
        })
        .await?
    }

    // Run the given closure with exclusive access to the state.
    //
    // The timeout bounds the wait for the lock and every single gateway
    // call, a batch that keeps completing calls runs to the end. A call
    // that times out keeps the lock until the gateway returns
    async fn with_state<F, R>(&self, f: F) -> Result<R, PowerError>
    where
        F: FnOnce(&mut ControllerState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let lock = self.state.clone().lock_owned();
        let mut guard = timeout(self.call_timeout, lock)
            .await
            .map_err(|_| PowerError::Timeout(self.call_timeout))?;
        trace!("GPU state lock acquired");

        let mut task = spawn_blocking(move || f(&mut *guard));

        loop {
            let seen = self.completed_calls.load(Ordering::SeqCst);

            match timeout(self.call_timeout, &mut task).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(err)) => {
                    return Err(PowerError::TaskFailed(err.to_string()));
                }
                Err(_) if self.completed_calls.load(Ordering::SeqCst) != seen => {
                    trace!("GPU calls still in progress")
                }
                Err(_) => return Err(PowerError::Timeout(self.call_timeout)),
            }
        }
    }
}
