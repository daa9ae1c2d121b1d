//! Intent routing
//!
//! ORDER and REMOVE pass through cart extraction first and then land in the
//! ORDER handler; every other intent goes straight to its own handler.

use super::intent::Intent;

/// Next step of the pipeline after classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run the cart extractor, then the ORDER handler
    ExtractThenOrder,
    /// Run the handler for this intent
    Handle(Intent),
}

impl Route {
    /// Handler that terminates this route
    pub fn handler(&self) -> Intent {
        match self {
            Route::ExtractThenOrder => Intent::Order,
            Route::Handle(intent) => *intent,
        }
    }
}

pub fn route(intent: Intent) -> Route {
    match intent {
        Intent::Order | Intent::Remove => Route::ExtractThenOrder,
        Intent::History => Route::Handle(Intent::History),
        Intent::Complaint => Route::Handle(Intent::Complaint),
        Intent::Greeting => Route::Handle(Intent::Greeting),
        Intent::MenuQa => Route::Handle(Intent::MenuQa),
        Intent::StoreInfo => Route::Handle(Intent::StoreInfo),
        Intent::Cancel => Route::Handle(Intent::Cancel),
    }
}

/// Intent for a raw label; labels outside the closed set go to GREETING
pub fn resolve_label(label: &str) -> Intent {
    Intent::from_label(label).unwrap_or_else(|| {
        tracing::warn!(label, "Unroutable intent label, greeting instead");
        Intent::Greeting
    })
}
