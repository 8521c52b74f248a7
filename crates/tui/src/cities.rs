//! City records and the service the screen talks to.

use resync_core::{
    CrudCoordinator, CrudResult, Entity, PathParams, Snapshot, SortDescriptor, SubscriptionId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// A city as served by `/regions/{region}/cities/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub population: u64,
    /// Founding date, `YYYY-MM-DD`.
    #[serde(default)]
    pub founded: Option<String>,
}

impl Entity for City {
    type Id = u64;

    fn id(&self) -> &u64 {
        &self.id
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(json!(self.id)),
            "name" => Some(json!(self.name)),
            "population" => Some(json!(self.population)),
            "founded" => self.founded.as_ref().map(|date| json!(date)),
            _ => None,
        }
    }
}

/// Payload for creating a city.
#[derive(Debug, Clone, Serialize)]
pub struct NewCity {
    pub name: String,
    pub population: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founded: Option<String>,
}

/// City operations for one region. Only what the screen needs is exposed.
#[derive(Debug, Clone)]
pub struct CityService {
    crud: CrudCoordinator<City>,
}

impl CityService {
    pub fn new(crud: CrudCoordinator<City>) -> Self {
        Self { crud }
    }

    pub async fn load_cities(&self, region: u64) -> CrudResult<Vec<City>> {
        self.crud.list(&self.collection_url(region)).await
    }

    pub async fn add_city(&self, region: u64, city: &NewCity) -> CrudResult<City> {
        self.crud.create(&self.collection_url(region), city).await
    }

    pub async fn refresh_city(&self, region: u64, id: u64) -> CrudResult<City> {
        self.crud.retrieve_item(&self.city_url(region, id)).await
    }

    pub async fn rename_city(&self, region: u64, id: u64, name: &str) -> CrudResult<City> {
        self.crud
            .patch(&self.city_url(region, id), &json!({ "name": name }))
            .await
    }

    pub async fn remove_city(&self, region: u64, id: u64) -> CrudResult<()> {
        self.crud.delete(&self.city_url(region, id), &id).await
    }

    pub fn forget_all(&self) {
        self.crud.clean();
    }

    pub fn watch(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Snapshot<City>>) {
        self.crud.subscribe_channel()
    }

    pub fn unwatch(&self, id: SubscriptionId) {
        self.crud.unsubscribe(id);
    }

    pub fn set_sort(&self, descriptors: Vec<SortDescriptor>) {
        self.crud.set_sort_descriptors(descriptors);
    }

    fn collection_url(&self, region: u64) -> String {
        self.crud
            .resolve_url(&PathParams::new().item("regions", region).collection("cities"))
    }

    fn city_url(&self, region: u64, id: u64) -> String {
        self.crud
            .resolve_url(&PathParams::new().item("regions", region).item("cities", id))
    }
}
