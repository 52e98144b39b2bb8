//! I/O for GeoTIFF rasters, tile mosaics and GeoJSON regions

mod mosaic;
mod native;
mod regions;

pub use mosaic::{mosaic, read_mosaic};
pub use native::{
    read_geotiff, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer,
    GeoTiffOptions, SampleType,
};
pub use regions::{read_regions_geojson, regions_from_geojson_str};
