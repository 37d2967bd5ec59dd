pub mod builder;

pub use builder::{
    build_catalog, merge_entries, scan_archive, scan_entry, split_definition, CatalogBuilder,
    CatalogStats, MarketCatalog, Selection,
};
