//! Plate injector
//!
//! Turns a barcode into a stored `PlateDescriptor`. The store is consulted
//! first, so each barcode reaches the registry at most once per store; every
//! outcome of the registry lookup, including the negative ones, is written
//! back as a descriptor.

use std::sync::Arc;

use xtal_common::config::RegistryRow;
use xtal_common::db::PlateStore;
use xtal_common::visit::{derive_visit, VisitError, VisitResolver};
use xtal_common::{PlateDescriptor, PlateFilter, PlateKind};

use crate::error::IngestResult;
use crate::registry::PlateRegistryClient;

/// Descriptor error for a barcode the registry does not know
pub const BARCODE_NOT_FOUND: &str = "barcode not found in registry";

/// Descriptor error for an experiment name that does not carry a visit
pub const MALFORMED_VISIT: &str = "visit identifier does not conform to expected pattern";

/// Descriptor error for a visit with no archive directory
pub const VISIT_DIRECTORY_NOT_FOUND: &str = "visit directory not found";

/// Descriptor error for a registry plate type the ingester cannot lay out
pub const UNSUPPORTED_PLATE_TYPE: &str = "plate type not supported";

pub struct PlateInjector {
    store: Arc<dyn PlateStore>,
    registry: Arc<PlateRegistryClient>,
}

impl PlateInjector {
    pub fn new(store: Arc<dyn PlateStore>, registry: Arc<PlateRegistryClient>) -> Self {
        Self { store, registry }
    }

    /// Stored descriptor for `barcode`, creating it from the registry if needed
    ///
    /// Registry and store failures are returned as errors and leave nothing
    /// behind; classification problems come back as a descriptor with `error`
    /// set.
    pub async fn find_or_inject_barcode(
        &self,
        barcode: &str,
        visits: &VisitResolver,
    ) -> IngestResult<PlateDescriptor> {
        if let Some(existing) = self
            .store
            .fetch_plates(&PlateFilter::barcode(barcode))
            .await?
            .into_iter()
            .next()
        {
            return Ok(existing);
        }

        let row = self.registry.query_barcode(barcode).await?;
        let descriptor = classify(barcode, row.as_ref(), visits);

        match &descriptor.error {
            Some(error) => tracing::warn!(
                barcode = %barcode,
                visit = ?descriptor.visit,
                error = %error,
                "Plate injected with error"
            ),
            None => tracing::info!(
                barcode = %barcode,
                visit = ?descriptor.visit,
                registry_plate_id = ?descriptor.registry_plate_id,
                "Plate injected"
            ),
        }

        self.store
            .upsert_plates(std::slice::from_ref(&descriptor))
            .await?;

        Ok(descriptor)
    }
}

/// Descriptor for a registry lookup result
pub fn classify(
    barcode: &str,
    row: Option<&RegistryRow>,
    visits: &VisitResolver,
) -> PlateDescriptor {
    let Some(row) = row else {
        return PlateDescriptor::with_error(barcode, BARCODE_NOT_FOUND);
    };

    let visit = match derive_visit(&row.experiment_name) {
        Ok(visit) => visit,
        Err(err) => {
            tracing::debug!(
                barcode = %barcode,
                experiment_name = %row.experiment_name,
                "{}",
                err
            );
            return PlateDescriptor {
                registry_plate_id: Some(row.registry_plate_id),
                ..PlateDescriptor::with_error(barcode, MALFORMED_VISIT)
            };
        }
    };

    let mut descriptor = PlateDescriptor {
        visit: Some(visit.clone()),
        registry_plate_id: Some(row.registry_plate_id),
        ..PlateDescriptor::new(barcode)
    };

    match visits.resolve(&visit) {
        Ok(_) => {}
        Err(VisitError::Absent(_)) => {
            descriptor.error = Some(VISIT_DIRECTORY_NOT_FOUND.to_string());
            return descriptor;
        }
        Err(VisitError::Malformed(_)) => {
            descriptor.error = Some(MALFORMED_VISIT.to_string());
            return descriptor;
        }
    }

    match PlateKind::from_registry_name(&row.plate_type) {
        Some(kind) => descriptor.plate_kind = Some(kind),
        None => {
            descriptor.error = Some(format!("{}: {}", UNSUPPORTED_PLATE_TYPE, row.plate_type));
        }
    }

    descriptor
}
