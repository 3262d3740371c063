use chrono::{DateTime, Duration, Local, TimeZone};
use plug_energy_monitor::history::{read_csv, HistoryStore};
use plug_energy_monitor::sampler::{AccumulatorState, Reading};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn t0() -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
}

fn temp_csv(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "plug-history-{}-{}.csv",
        name,
        std::process::id()
    ));
    std::fs::remove_file(&path).ok();
    path
}

fn reading(watts: f64) -> Reading {
    Reading {
        power_on: true,
        power_watts: watts,
        voltage_volts: 229.8,
        current_milliamps: watts / 229.8 * 1000.0,
    }
}

/// Drive the accumulator through `offsets` (seconds after t0) at constant power.
fn samples(offsets: &[i64], watts: f64) -> Vec<plug_energy_monitor::sampler::Sample> {
    let mut state = AccumulatorState {
        last_update_time: Some(t0()),
        ..Default::default()
    };
    offsets
        .iter()
        .map(|s| {
            let (sample, next) = state.advance(reading(watts), t0() + Duration::seconds(*s), 6.0);
            state = next;
            sample
        })
        .collect()
}

#[test]
fn test_spacing_filter() {
    let path = temp_csv("spacing");
    let mut store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    let s = samples(&[0, 30, 65], 100.0);

    assert!(store.append(&s[0]));
    assert!(!store.append(&s[1]));
    assert_eq!(store.rows().len(), 1);

    let table = store.record(&s[2]);
    assert_eq!(table.len(), 2);
    assert_eq!(table[1].time, t0() + Duration::seconds(65));

    let on_disk = read_csv(&path).unwrap();
    assert_eq!(on_disk.len(), 2);
    assert_eq!(on_disk[0].time, t0());
    assert_eq!(on_disk[1].time, t0() + Duration::seconds(65));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_record_returns_full_table_when_skipping() {
    let path = temp_csv("skip");
    let mut store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    let s = samples(&[0, 10, 20], 40.0);

    store.record(&s[0]);
    let table = store.record(&s[1]);
    assert_eq!(table.len(), 1);
    let table = store.record(&s[2]);
    assert_eq!(table.len(), 1);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_earlier_timestamp_is_rejected() {
    let path = temp_csv("backwards");
    let mut store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    let s = samples(&[120, 0], 40.0);

    assert!(store.append(&s[0]));
    assert!(!store.append(&s[1]));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_restart_seeds_log_and_appends_after_it() {
    let path = temp_csv("restart");
    let s = samples(&[0, 60, 120, 300], 500.0);

    {
        let mut store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
        for sample in &s[..3] {
            store.append(sample);
        }
    }

    let mut reopened = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    assert_eq!(reopened.rows().len(), 3);
    let last = reopened.last().unwrap();
    assert_eq!(last.time, t0() + Duration::seconds(120));
    assert!((last.energy_kwh - s[2].cumulative_energy_kwh).abs() < 1e-12);
    assert!((last.cost - s[2].cumulative_cost).abs() < 1e-12);
    assert_eq!(last.duration_min, 2);

    let table = reopened.record(&s[3]);
    assert_eq!(table.len(), 4);
    assert!(table[3].time > table[2].time);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_reads_file_written_by_earlier_runs() {
    let path = temp_csv("legacy");
    std::fs::write(
        &path,
        "Time,Current (mA),Voltage (V),Power (W),Energy (kWh),Cost (BDT),Duration (min)\n\
         2025-03-10 08:58:01.412533,0.0,0.0,0.0,0.0,0.0,0\n\
         2025-03-10 08:59:02.901127,431.0,230.1,97.4,0.0016,0.0096,1\n",
    )
    .unwrap();

    let store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    assert_eq!(store.rows().len(), 2);

    let row = &store.rows()[1];
    assert_eq!(row.current_ma, 431.0);
    assert_eq!(row.voltage_v, 230.1);
    assert_eq!(row.power_w, 97.4);
    assert_eq!(row.energy_kwh, 0.0016);
    assert_eq!(row.duration_min, 1);

    let state = AccumulatorState::resume_from(store.last(), t0());
    assert_eq!(state.accumulated_kwh, 0.0016);
    assert!(state.on_time.is_some());

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_malformed_file_is_an_error() {
    let path = temp_csv("malformed");
    std::fs::write(
        &path,
        "Time,Current (mA),Voltage (V),Power (W),Energy (kWh),Cost (BDT),Duration (min)\n\
         not-a-time,1,2,3,4,5,6\n",
    )
    .unwrap();

    assert!(HistoryStore::open(&path, Duration::seconds(60)).is_err());

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_persist_failure_keeps_in_memory_log() {
    let path = std::env::temp_dir()
        .join(format!("plug-missing-dir-{}", std::process::id()))
        .join("history.csv");
    let mut store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    let s = samples(&[0, 60], 10.0);

    assert!(store.append(&s[0]));
    assert!(store.append(&s[1]));
    assert_eq!(store.rows().len(), 2);
    assert!(!path.exists());
}

#[test]
fn test_no_temp_file_left_behind() {
    let path = temp_csv("tmpfile");
    let mut store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    store.append(&samples(&[0], 10.0)[0]);

    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    assert!(path.exists());
    assert!(!PathBuf::from(tmp).exists());

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_failed_rename_removes_temp_file() {
    let path = temp_csv("rename-fails");
    let mut store = HistoryStore::open(&path, Duration::seconds(60)).unwrap();
    std::fs::remove_dir(&path).ok();
    std::fs::create_dir(&path).unwrap();

    assert!(store.append(&samples(&[0], 10.0)[0]));
    assert_eq!(store.rows().len(), 1);

    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    assert!(!PathBuf::from(tmp).exists());
    assert!(path.is_dir());

    std::fs::remove_dir(&path).ok();
}
