use chrono::NaiveDate;
use geo::{polygon, MultiPolygon, Point};
use load_fusion::models::{ClimateZone, CustomerClass, ProfileCatalogEntry, ZipRecord};
use load_fusion::sink::VecSink;
use load_fusion::{FusionPipeline, HourlyRecord, PipelineConfig, Territory};

fn square(x0: f64, y0: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: x0, y: y0),
        (x: x0 + 1.0, y: y0),
        (x: x0 + 1.0, y: y0 + 1.0),
        (x: x0, y: y0 + 1.0),
        (x: x0, y: y0),
    ]])
}

fn main() -> load_fusion::Result<()> {
    // Two climate zones side by side: zone 3 (Coastal) and zone 4 (Inland)
    let zones = vec![
        ClimateZone {
            agency_zone_id: 3,
            polygon: square(-119.0, 34.0),
        },
        ClimateZone {
            agency_zone_id: 4,
            polygon: square(-118.0, 34.0),
        },
    ];

    let zips = vec![
        ZipRecord::new("90210", 21_741, 10.2, Point::new(-118.6, 34.5))?,
        ZipRecord::new("90212", 11_555, 1.4, Point::new(-117.4, 34.5))?,
        // Outside both zones; reported, not fused
        ZipRecord::new("96161", 16_957, 150.0, Point::new(-120.2, 39.3))?,
    ];

    let catalog = vec![
        ProfileCatalogEntry::new("1_1_NS_C", Territory::Coastal, CustomerClass::Residential),
        ProfileCatalogEntry::new("2_1_NS_I", Territory::Inland, CustomerClass::Residential),
        ProfileCatalogEntry::new("7_2_S_I", Territory::Inland, CustomerClass::NonResidential),
    ];

    let date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap_or_default();
    let mut hourly = Vec::new();
    for profile_id in ["1_1_NS_C", "2_1_NS_I", "7_2_S_I"] {
        for hour in 0..24u8 {
            hourly.push(HourlyRecord {
                profile_id: profile_id.to_string(),
                date,
                hour,
                kwh: 0.16 + f64::from(hour) * 0.01,
            });
        }
    }

    let pipeline = FusionPipeline::new(PipelineConfig::default());
    let mut prepared = pipeline.prepare(zones, &zips, &catalog)?;
    let mut sink = VecSink::new();
    let stats = pipeline.fuse_hourly(&mut prepared, hourly, &mut sink)?;

    println!("Sample Merge Results");
    println!("====================");
    for zip in &prepared.zips_final {
        println!(
            "{} -> {} (zone {}): {}",
            zip.zip_code,
            zip.territory,
            zip.agency_zone_id,
            zip.profile_ids.join(", ")
        );
    }
    println!();
    println!("ZIP-profile pairs: {}", prepared.expanded.len());
    println!("Fused rows:        {}", stats.fused_rows);
    println!("Unassigned ZIPs:   {:?}", prepared.diagnostics.unassigned_zip_codes);
    println!();
    println!("First rows:");
    for row in sink.rows.iter().take(5) {
        println!(
            "  {} {} {} {:02}:00 {:.2} kWh",
            row.zip_code, row.profile_id, row.date, row.hour, row.kwh
        );
    }

    Ok(())
}
