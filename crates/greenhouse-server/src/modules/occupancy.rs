//! Occupancy rates of the growing units
//!
//! Every mutation loads the module document, applies the change and saves
//! the whole document back. Mutations of one module are serialised by an
//! in-process lock; the store additionally rejects a save whose version is
//! stale, which surfaces as a `Conflict` error.

use super::to_json;
use crate::endpoint::{Endpoint, Method};
use crate::error::{ApiError, ApiResult};
use crate::module::{Joinable, Module, Services};
use crate::query::Params;
use crate::task::{TaskOptions, TaskSchedule};
use chrono::Utc;
use greenhouse_core::{OccupancyModule, DEFAULT_MODULES, MAX_SLOTS};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

pub const NAME: &str = "OccupancyRateModule";
pub const RATES_SCHEDULE: &str = "0 0 * * * *";

fn no_module(name: &str) -> ApiError {
    ApiError::NotFound {
        tag: "No module found".to_string(),
        message: format!("No module with name \"{name}\""),
    }
}

/// One change applied to a module document
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddUnit {
        name: String,
        slots: u32,
        group: Option<usize>,
    },
    MoveUnit {
        group: usize,
        unit: usize,
        to: usize,
    },
    ChangeSlots {
        group: usize,
        unit: usize,
        slots: u32,
    },
    RemoveUnit {
        group: usize,
        unit: usize,
    },
    EditElement {
        group: usize,
        unit: usize,
        element: usize,
        value: Option<String>,
        comment: Option<String>,
    },
}

fn slot_count(params: &Params) -> ApiResult<u32> {
    let slots: u32 = params.parse_required("slots")?;
    if slots == 0 || slots > MAX_SLOTS {
        return Err(ApiError::invalid(format!("Invalid value for slots: {slots}")));
    }
    Ok(slots)
}

impl Mutation {
    pub fn add_unit(params: &Params) -> ApiResult<(String, Self)> {
        params.require(&["module", "name", "slots"])?;
        let group = match params.parse::<i64>("group")? {
            None | Some(-1) => None,
            Some(index) => Some(
                usize::try_from(index)
                    .map_err(|_| ApiError::invalid(format!("Invalid value for group: {index}")))?,
            ),
        };
        let mutation = Mutation::AddUnit {
            name: params.string("name")?,
            slots: slot_count(params)?,
            group,
        };
        Ok((params.string("module")?, mutation))
    }

    pub fn move_unit(params: &Params) -> ApiResult<(String, Self)> {
        params.require(&["module", "group", "unit", "to"])?;
        let mutation = Mutation::MoveUnit {
            group: params.parse_required("group")?,
            unit: params.parse_required("unit")?,
            to: params.parse_required("to")?,
        };
        Ok((params.string("module")?, mutation))
    }

    pub fn change_slots(params: &Params) -> ApiResult<(String, Self)> {
        params.require(&["module", "group", "unit", "slots"])?;
        let mutation = Mutation::ChangeSlots {
            group: params.parse_required("group")?,
            unit: params.parse_required("unit")?,
            slots: slot_count(params)?,
        };
        Ok((params.string("module")?, mutation))
    }

    pub fn remove_unit(params: &Params) -> ApiResult<(String, Self)> {
        params.require(&["module", "group", "unit"])?;
        let mutation = Mutation::RemoveUnit {
            group: params.parse_required("group")?,
            unit: params.parse_required("unit")?,
        };
        Ok((params.string("module")?, mutation))
    }

    /// Empty `value` or `comment` clear the field
    pub fn edit_element(params: &Params) -> ApiResult<(String, Self)> {
        params.require(&["module", "group", "unit", "element"])?;
        let mutation = Mutation::EditElement {
            group: params.parse_required("group")?,
            unit: params.parse_required("unit")?,
            element: params.parse_required("element")?,
            value: params.get("value").map(str::to_string),
            comment: params.get("comment").map(str::to_string),
        };
        Ok((params.string("module")?, mutation))
    }

    /// Validate against the module and apply; the module is untouched on error
    pub fn apply(self, module: &mut OccupancyModule) -> ApiResult<()> {
        match self {
            Mutation::AddUnit { name, slots, group } => {
                module.add_unit(name, slots, group)?;
            }
            Mutation::MoveUnit { group, unit, to } => module.move_unit(group, unit, to)?,
            Mutation::ChangeSlots { group, unit, slots } => {
                module.resize_unit(group, unit, slots)?
            }
            Mutation::RemoveUnit { group, unit } => {
                module.remove_unit(group, unit)?;
            }
            Mutation::EditElement {
                group,
                unit,
                element,
                value,
                comment,
            } => module.edit_element(group, unit, element, value, comment)?,
        }
        Ok(())
    }
}

pub struct OccupancyRateModule {
    services: Services,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OccupancyRateModule {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of modules holding a mutation lock
    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn get_module(&self, params: &Params) -> ApiResult<Value> {
        params.require(&["name"])?;
        let name = params.string("name")?;
        let module = self
            .services
            .db
            .find_occupancy_module(&name)
            .await?
            .ok_or_else(|| no_module(&name))?;
        Ok(json!({ "module": module.view() }))
    }

    pub async fn get_modules(&self) -> ApiResult<Value> {
        let modules = self.services.db.list_occupancy_modules().await?;
        let views: Vec<_> = modules.iter().map(OccupancyModule::view).collect();
        Ok(json!({ "modules": views }))
    }

    /// Load, mutate and save one module under its lock
    #[instrument(skip(self, mutation))]
    pub async fn mutate(&self, name: &str, mutation: Mutation) -> ApiResult<Value> {
        // locks are only created for stored modules
        if self.services.db.find_occupancy_module(name).await?.is_none() {
            return Err(no_module(name));
        }
        let _guard = self.lock(name).await;
        let mut module = self
            .services
            .db
            .find_occupancy_module(name)
            .await?
            .ok_or_else(|| no_module(name))?;

        debug!(?mutation, version = module.version, "applying mutation");
        mutation.apply(&mut module)?;
        self.services.db.save_occupancy_module(&mut module).await?;

        Ok(json!({ "message": "success", "module": module.view() }))
    }

    /// Record the current rate of every unit of every module
    #[instrument(skip(self))]
    pub async fn compute_rates(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut computed = 0;
        for stored in self.services.db.list_occupancy_modules().await? {
            let _guard = self.lock(&stored.name).await;
            // reload under the lock so a concurrent mutation is not lost
            let Some(mut module) = self.services.db.find_occupancy_module(&stored.name).await?
            else {
                continue;
            };
            let rates = module.compute_rates(now);
            self.services.db.save_occupancy_module(&mut module).await?;
            debug!(module = %module.name, units = rates.len(), "rates computed");
            computed += rates.len();
        }
        info!(units = computed, "occupancy rates computed");
        Ok(computed)
    }

    fn mutation_endpoint<P>(self: &Arc<Self>, method: Method, path: &str, parse: P) -> Endpoint
    where
        P: Fn(&Params) -> ApiResult<(String, Mutation)> + Send + Sync + 'static,
    {
        let module = Arc::clone(self);
        Endpoint::http(method, path, move |params| {
            let module = Arc::clone(&module);
            let parsed = parse(&params);
            async move {
                let (name, mutation) = parsed?;
                module.mutate(&name, mutation).await
            }
        })
    }

    fn read_endpoint<F, Fut>(self: &Arc<Self>, path: &str, read: F) -> Endpoint
    where
        F: Fn(Arc<Self>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<Value>> + Send + 'static,
    {
        let module = Arc::clone(self);
        Endpoint::http(Method::GET, path, move |params| read(Arc::clone(&module), params))
    }
}

impl Joinable for OccupancyRateModule {}

#[async_trait::async_trait]
impl Module for OccupancyRateModule {
    fn name(&self) -> &str {
        NAME
    }

    fn endpoints(self: Arc<Self>) -> Vec<Endpoint> {
        vec![
            self.read_endpoint("/getOCModule", |module, params| async move {
                module.get_module(&params).await
            }),
            self.read_endpoint("/getOCModules", |module, _params| async move {
                module.get_modules().await
            }),
            self.mutation_endpoint(Method::POST, "/addOCUnit", Mutation::add_unit),
            self.mutation_endpoint(Method::PUT, "/moveOCUnit", Mutation::move_unit),
            self.mutation_endpoint(Method::PUT, "/changeOCUnitSlots", Mutation::change_slots),
            self.mutation_endpoint(Method::DELETE, "/removeOCUnit", Mutation::remove_unit),
            self.mutation_endpoint(Method::PUT, "/editOCElement", Mutation::edit_element),
        ]
    }

    fn tasks(self: Arc<Self>) -> anyhow::Result<Vec<TaskOptions>> {
        let schedule = TaskSchedule::cron(RATES_SCHEDULE)?;
        Ok(vec![TaskOptions::new(schedule, move |_task| {
            let module = Arc::clone(&self);
            async move { module.compute_rates().await.map(|_| ()) }
        })])
    }

    async fn init(&self) -> anyhow::Result<()> {
        for name in DEFAULT_MODULES {
            if self.services.db.ensure_occupancy_module(name).await? {
                info!(module = name, "occupancy module created");
            }
        }
        if self.services.db.list_occupancy_modules().await?.is_empty() {
            warn!("no occupancy module available");
        }
        Ok(())
    }
}
