//! GeoTIFF reading/writing on top of the `tiff` crate
//!
//! Georeferencing comes from ModelPixelScale + ModelTiepoint (or the
//! ModelTransformation matrix), the CRS from the GeoKeyDirectory
//! (ProjectedCSType / GeographicType) and no-data from GDAL_NODATA.

use crate::crs::{projection_for, CRS};
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use num_traits::NumCast;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{Gray32Float, Gray8};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// Sample type written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleType {
    /// 32-bit float, suitable for heights and areas
    #[default]
    Float32,
    /// 8-bit unsigned, suitable for masks
    UInt8,
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    pub sample_type: SampleType,
}

impl GeoTiffOptions {
    pub fn mask() -> Self {
        Self {
            sample_type: SampleType::UInt8,
        }
    }
}

/// Read the first band of a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(file)
}

/// Read a GeoTIFF held in memory
pub fn read_geotiff_from_buffer<T>(data: &[u8]) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data))
}

fn cast_all<S, T>(buf: Vec<S>) -> Vec<T>
where
    S: NumCast + Copy,
    T: RasterElement,
{
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder =
        Decoder::new(reader).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
    let rows = height as usize;
    let cols = width as usize;

    let data: Vec<T> = match decoder
        .read_image()
        .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?
    {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };

    if data.len() != rows * cols {
        // Multi-sample images decode interleaved
        return Err(Error::UnsupportedDataType(format!(
            "expected one sample per pixel, got {} values for {}x{}",
            data.len(),
            cols,
            rows
        )));
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_crs(&mut decoder));
    if let Some(nodata) = read_nodata(&mut decoder) {
        // A declared value that the element type cannot hold is ignored
        let nd: Option<T> = NumCast::from(nodata);
        if nd.is_some() || nodata.is_nan() {
            raster.set_nodata(nd.or_else(|| Some(T::default_nodata())));
        }
    }

    Ok(raster)
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE)).ok();
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT)).ok();

    if let (Some(scale), Some(tiepoint)) = (scale, tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 {
            // tiepoint: [I, J, K, X, Y, Z]
            let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
            let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
            return Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
        }
    }

    // Row-major 4x4 matrix
    let t = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION))
        .ok()?;
    if t.len() < 16 {
        return None;
    }
    Some(GeoTransform {
        origin_x: t[3],
        origin_y: t[7],
        pixel_width: t[0],
        pixel_height: t[5],
        row_rotation: t[1],
        col_rotation: t[4],
    })
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder
        .get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY))
        .ok()?;
    crs_from_geokeys(&keys)
}

/// Pick the EPSG code out of a GeoKeyDirectory.
///
/// Layout: `[version, revision, minor, count, (id, location, count, value)*]`.
/// Only keys stored inline (location 0) are considered.
fn crs_from_geokeys(keys: &[u16]) -> Option<CRS> {
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;
    let mut geographic = None;

    for entry in keys[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == 0 || value == 32767 {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE_KEY => return Some(CRS::from_epsg(value as u32)),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(CRS::from_epsg(value as u32)),
            _ => {}
        }
    }

    geographic
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let text = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA))
        .ok()?;
    text.trim_end_matches('\0').trim().parse::<f64>().ok()
}

/// GeoKeyDirectory for `crs`, keys sorted by id
fn geokeys_for(crs: Option<&CRS>) -> Vec<u16> {
    let geographic = crs
        .and_then(|c| projection_for(c).ok())
        .map(|p| p.is_geographic())
        .unwrap_or(false);
    let code = crs
        .and_then(|c| c.epsg())
        .and_then(|code| u16::try_from(code).ok());

    let mut entries: Vec<[u16; 4]> = vec![
        [GT_MODEL_TYPE_KEY, 0, 1, if geographic { 2 } else { 1 }],
        // RasterPixelIsArea
        [GT_RASTER_TYPE_KEY, 0, 1, 1],
    ];
    if let Some(code) = code {
        let key = if geographic {
            GEOGRAPHIC_TYPE_KEY
        } else {
            PROJECTED_CS_TYPE_KEY
        };
        entries.push([key, 0, 1, code]);
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.iter().flatten());
    keys
}

/// Write a Raster to a GeoTIFF file
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(raster, &mut writer, options.unwrap_or_default())?;
    writer.flush()?;
    Ok(())
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>, options: Option<GeoTiffOptions>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf), options.unwrap_or_default())?;
    Ok(buf)
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;
    let (rows, cols) = raster.shape();
    let gt = raster.transform();

    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    let geokeys = geokeys_for(raster.crs());
    let nodata = raster.nodata().and_then(|v| v.to_f64()).map(|v| {
        if v.is_nan() {
            "nan".to_string()
        } else {
            v.to_string()
        }
    });

    let tag_err = |e: tiff::TiffError| Error::Other(format!("Cannot write GeoTIFF tag: {}", e));

    macro_rules! write_image {
        ($color:ty, $data:expr) => {{
            let mut image = encoder
                .new_image::<$color>(cols as u32, rows as u32)
                .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;
            let enc = image.encoder();
            enc.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &scale[..])
                .map_err(tag_err)?;
            enc.write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])
                .map_err(tag_err)?;
            enc.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), geokeys.as_slice())
                .map_err(tag_err)?;
            if let Some(text) = &nodata {
                enc.write_tag(Tag::Unknown(GDAL_NODATA), text.as_str())
                    .map_err(tag_err)?;
            }
            image
                .write_data($data)
                .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;
        }};
    }

    match options.sample_type {
        SampleType::Float32 => {
            let data: Vec<f32> = raster
                .data()
                .iter()
                .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
                .collect();
            write_image!(Gray32Float, &data);
        }
        SampleType::UInt8 => {
            let data: Vec<u8> = raster
                .data()
                .iter()
                .map(|&v| num_traits::cast(v).unwrap_or(u8::MAX))
                .collect();
            write_image!(Gray8, &data);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_heights() -> Raster<f32> {
        let mut r = Raster::from_vec((0..12).map(|v| v as f32).collect(), 3, 4).unwrap();
        r.set_transform(GeoTransform::new(7_000_000.0, 950_000.0, 2.0, -2.0));
        r.set_crs(Some(CRS::statistics_canada_lambert()));
        r.set_nodata(Some(-9999.0));
        r.set(1, 1, -9999.0).unwrap();
        r
    }

    #[test]
    fn test_buffer_roundtrip_keeps_metadata() {
        let original = sample_heights();
        let bytes = write_geotiff_to_buffer(&original, None).unwrap();
        let loaded: Raster<f32> = read_geotiff_from_buffer(&bytes).unwrap();

        assert_eq!(loaded.shape(), (3, 4));
        assert_eq!(loaded.transform(), original.transform());
        assert_eq!(loaded.crs().and_then(|c| c.epsg()), Some(3347));
        assert_eq!(loaded.nodata(), Some(-9999.0));
        assert!(loaded.is_nodata(loaded.get(1, 1).unwrap()));
        assert_eq!(loaded.get(2, 3).unwrap(), 11.0);
    }

    #[test]
    fn test_file_roundtrip_mask() {
        let mut mask: Raster<u8> = Raster::from_vec(vec![0, 1, 255, 1], 2, 2).unwrap();
        mask.set_crs(Some(CRS::wgs84()));
        mask.set_transform(GeoTransform::new(-80.0, 45.0, 0.001, -0.001));
        mask.set_nodata(Some(255));

        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_geotiff(&mask, tmp.path(), Some(GeoTiffOptions::mask())).unwrap();
        let loaded: Raster<u8> = read_geotiff(tmp.path()).unwrap();

        assert_eq!(loaded.data(), mask.data());
        assert_eq!(loaded.crs().and_then(|c| c.epsg()), Some(4326));
        assert_eq!(loaded.nodata(), Some(255));
    }

    #[test]
    fn test_geokeys_sorted_and_parsed() {
        let keys = geokeys_for(Some(&CRS::nad83()));
        let ids: Vec<u16> = keys[4..].chunks(4).map(|e| e[0]).collect();
        assert_eq!(ids, vec![1024, 1025, 2048]);
        assert_eq!(keys[4 + 3], 2);
        assert_eq!(crs_from_geokeys(&keys), Some(CRS::nad83()));

        let projected = geokeys_for(Some(&CRS::statistics_canada_lambert()));
        assert_eq!(crs_from_geokeys(&projected), Some(CRS::from_epsg(3347)));

        assert_eq!(crs_from_geokeys(&geokeys_for(None)), None);
    }
}
