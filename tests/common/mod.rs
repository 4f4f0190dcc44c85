#![allow(dead_code)]

use eql::schema::{EntityMetadata, InMemorySchema, Table};
use eql::{Query, QueryCompileError};
use std::time::Duration;

/// Order/Customer/LineItem shop model plus an HR model, a discriminated
/// entity, and one entity with a composite identity.
pub fn schema() -> InMemorySchema {
    InMemorySchema::new()
        .with_entity(
            EntityMetadata::new(
                "Order",
                Table::new("orders").with_cache_timeout(Duration::from_secs(1)),
            )
            .with_id("id", "id")
            .with_column("total", "total")
            .with_column("status", "status")
            .with_many_to_one("customer", "Customer", &["customer_id"])
            .with_one_to_many("items", "LineItem", &["order_id"])
            .with_many_to_many(
                "tags",
                "Tag",
                Table::new("order_tags"),
                &["order_id"],
                &["tag_id"],
            ),
        )
        .with_entity(
            EntityMetadata::new("Customer", Table::new("customers"))
                .with_id("id", "id")
                .with_column("name", "name")
                .with_column("email", "email")
                .with_many_to_one("address", "Address", &["address_id"])
                .with_one_to_many("orders", "Order", &["customer_id"]),
        )
        .with_entity(
            EntityMetadata::new("LineItem", Table::new("line_items"))
                .with_id("id", "id")
                .with_column("qty", "qty")
                .with_column("price", "price")
                .with_many_to_one("order", "Order", &["order_id"])
                .with_many_to_one("product", "Product", &["product_id"]),
        )
        .with_entity(
            EntityMetadata::new(
                "Product",
                Table::new("products")
                    .with_cache_timeout(Duration::from_secs(5))
                    .with_read_only(true),
            )
            .with_id("id", "id")
            .with_column("name", "name")
            .with_column("price", "price"),
        )
        .with_entity(
            EntityMetadata::new("Address", Table::new("addresses"))
                .with_id("id", "id")
                .with_column("city", "city"),
        )
        .with_entity(
            EntityMetadata::new("Tag", Table::new("tags"))
                .with_id("id", "id")
                .with_column("label", "label"),
        )
        .with_entity(
            EntityMetadata::new("Employee", Table::new("employees"))
                .with_id("id", "id")
                .with_column("name", "name")
                .with_column("salary", "salary")
                .with_many_to_one("department", "Department", &["department_id"]),
        )
        .with_entity(
            EntityMetadata::new("Department", Table::new("departments"))
                .with_id("id", "id")
                .with_column("name", "name"),
        )
        .with_entity(
            EntityMetadata::new("Car", Table::new("vehicles"))
                .with_id("id", "id")
                .with_column("model", "model")
                .with_discriminator("kind", "CAR"),
        )
        .with_entity(
            EntityMetadata::new("Shipment", Table::new("shipments"))
                .with_id("region", "region")
                .with_id("number", "number")
                .with_column("weight", "weight"),
        )
        .with_entity(
            EntityMetadata::new("Parcel", Table::new("parcels"))
                .with_id("id", "id")
                .with_many_to_one(
                    "shipment",
                    "Shipment",
                    &["shipment_region", "shipment_number"],
                ),
        )
}

pub fn compile(text: &str) -> Result<Query, QueryCompileError> {
    eql::compile(text, &schema())
}

/// SQL of a query that must compile.
pub fn sql(text: &str) -> String {
    match compile(text) {
        Ok(query) => query.sql().to_string(),
        Err(e) => panic!("failed to compile {text}: {e}"),
    }
}

/// Error code of a query that must fail.
pub fn error_code(text: &str) -> &'static str {
    match compile(text) {
        Ok(query) => panic!("expected {text} to fail, got {}", query.sql()),
        Err(e) => e.code(),
    }
}

pub const ORDER_COLUMNS: &str = "o.id, o.total, o.status, o.customer_id";
