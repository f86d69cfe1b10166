/// Multivariate series files and their train/val/test windows
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use ndarray_npy::ReadNpyExt;

use super::time_features::{parse_timestamp, Frequency};

/// Dataset implementation selected from the dataset identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// ETTh1 / ETTh2: hourly, fixed 12/4/4 month borders
    EttHour,
    /// ETTm1 / ETTm2: 15-minute, fixed 12/4/4 month borders
    EttMinute,
    /// PEMS08S: traffic readings from `.npy`, 6:2:2 split, no calendar
    Pems,
    /// Anything else: hourly CSV, 7:1:2 split
    Custom,
}

const HOURS_PER_MONTH: usize = 30 * 24;

impl DatasetKind {
    pub fn from_data_path(data_path: &str) -> Self {
        match data_path {
            "ETTh1" | "ETTh2" => DatasetKind::EttHour,
            "ETTm1" | "ETTm2" => DatasetKind::EttMinute,
            "PEMS08S" => DatasetKind::Pems,
            _ => DatasetKind::Custom,
        }
    }

    /// Calendar frequency, `None` for datasets without a date column
    pub fn frequency(&self) -> Option<Frequency> {
        match self {
            DatasetKind::EttHour | DatasetKind::Custom => Some(Frequency::Hourly),
            DatasetKind::EttMinute => Some(Frequency::Minutely),
            DatasetKind::Pems => None,
        }
    }

    /// Width of the mark tensors produced for this dataset
    pub fn mark_dim(&self) -> usize {
        self.frequency().map(|f| f.num_features()).unwrap_or(1)
    }

    pub fn file_name(&self, data_path: &str) -> String {
        match self {
            DatasetKind::Pems => format!("{}.npy", data_path),
            _ => format!("{}.csv", data_path),
        }
    }

    /// Row ranges of the train, val and test splits
    ///
    /// Val and test start `seq_len` rows early so their first window sees a
    /// full input history. Ends are clamped to the available rows.
    pub fn borders(&self, rows: usize, seq_len: usize) -> [Range<usize>; 3] {
        let (train_end, val_end, test_end) = match self {
            DatasetKind::EttHour => (
                12 * HOURS_PER_MONTH,
                16 * HOURS_PER_MONTH,
                20 * HOURS_PER_MONTH,
            ),
            DatasetKind::EttMinute => (
                12 * HOURS_PER_MONTH * 4,
                16 * HOURS_PER_MONTH * 4,
                20 * HOURS_PER_MONTH * 4,
            ),
            DatasetKind::Custom => {
                let num_train = (rows as f64 * 0.7) as usize;
                let num_test = (rows as f64 * 0.2) as usize;
                let num_val = rows - num_train - num_test;
                (num_train, num_train + num_val, rows)
            }
            DatasetKind::Pems => (
                (rows as f64 * 0.6) as usize,
                (rows as f64 * 0.8) as usize,
                rows,
            ),
        };

        let clamp = |r: Range<usize>| r.start.min(rows)..r.end.min(rows);
        [
            clamp(0..train_end),
            clamp(train_end.saturating_sub(seq_len)..val_end),
            clamp(val_end.saturating_sub(seq_len)..test_end),
        ]
    }
}

/// Values and marks of a whole file, row-aligned
#[derive(Debug, Clone)]
pub struct RawSeries {
    /// `[rows, num_nodes]`
    pub values: Array2<f32>,
    /// `[rows, mark_dim]`
    pub marks: Array2<f32>,
}

impl RawSeries {
    /// Load `<root>/<data_path>.{csv,npy}` for the given dataset kind
    pub fn load<P: AsRef<Path>>(root: P, data_path: &str, kind: DatasetKind) -> crate::Result<Self> {
        let path = root.as_ref().join(kind.file_name(data_path));
        log::info!("Loading {:?} dataset from: {:?}", kind, path);

        match kind.frequency() {
            Some(freq) => Self::from_csv(&path, freq),
            None => Self::from_npy(&path),
        }
    }

    /// CSV with a header row, a date first column, and numeric columns after it
    pub fn from_csv(path: &Path, freq: Frequency) -> crate::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;

        let mut values = Vec::new();
        let mut marks = Vec::new();
        let mut width: Option<usize> = None;
        let mut rows = 0usize;

        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let mut fields = record.iter();
            let date = fields.next().ok_or_else(|| {
                crate::ForecastError::Data(format!("{:?}: empty row {}", path, line + 2))
            })?;
            marks.extend(freq.features(&parse_timestamp(date)?));

            let before = values.len();
            for field in fields {
                let v = field.trim().parse::<f32>().map_err(|e| {
                    crate::ForecastError::Data(format!(
                        "{:?}: row {}: bad value '{}': {}",
                        path,
                        line + 2,
                        field,
                        e
                    ))
                })?;
                values.push(v);
            }

            let row_width = values.len() - before;
            match width {
                None => width = Some(row_width),
                Some(w) if w != row_width => {
                    return Err(crate::ForecastError::Data(format!(
                        "{:?}: row {} has {} values, expected {}",
                        path,
                        line + 2,
                        row_width,
                        w
                    )));
                }
                Some(_) => {}
            }
            rows += 1;
        }

        let width = width.unwrap_or(0);
        let values = Array2::from_shape_vec((rows, width), values)
            .map_err(|e| crate::ForecastError::Data(e.to_string()))?;
        let marks = Array2::from_shape_vec((rows, freq.num_features()), marks)
            .map_err(|e| crate::ForecastError::Data(e.to_string()))?;

        log::info!("Loaded {} rows x {} series from {:?}", rows, width, path);

        Ok(Self { values, marks })
    }

    /// `.npy` of shape `[T, N]` or `[T, N, F]` (feature 0 is kept); marks are a
    /// single zero column
    pub fn from_npy(path: &Path) -> crate::Result<Self> {
        let values = read_npy_series(path)?;
        let marks = Array2::zeros((values.nrows(), 1));

        log::info!(
            "Loaded {} rows x {} series from {:?}",
            values.nrows(),
            values.ncols(),
            path
        );

        Ok(Self { values, marks })
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn num_nodes(&self) -> usize {
        self.values.ncols()
    }
}

fn read_npy_series(path: &Path) -> crate::Result<Array2<f32>> {
    let open = || -> crate::Result<BufReader<File>> { Ok(BufReader::new(File::open(path)?)) };

    if let Ok(arr) = Array3::<f64>::read_npy(open()?) {
        return Ok(arr.index_axis(Axis(2), 0).mapv(|v| v as f32));
    }
    if let Ok(arr) = Array3::<f32>::read_npy(open()?) {
        return Ok(arr.index_axis(Axis(2), 0).to_owned());
    }
    if let Ok(arr) = Array2::<f64>::read_npy(open()?) {
        return Ok(arr.mapv(|v| v as f32));
    }
    Array2::<f32>::read_npy(open()?).map_err(|e| {
        crate::ForecastError::Data(format!("Failed to read {:?}: {}", path, e))
    })
}

/// One sample: flattened row-major windows
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// `[seq_len * num_nodes]`
    pub x: Vec<f32>,
    /// `[pred_len * num_nodes]`
    pub y: Vec<f32>,
    /// `[seq_len * mark_dim]`
    pub x_mark: Vec<f32>,
    /// `[pred_len * mark_dim]`
    pub y_mark: Vec<f32>,
}

/// Scaled rows of one split, indexed by window start
#[derive(Debug, Clone)]
pub struct SeriesSplit {
    values: Array2<f32>,
    marks: Array2<f32>,
    seq_len: usize,
    pred_len: usize,
}

impl SeriesSplit {
    pub fn new(
        values: Array2<f32>,
        marks: Array2<f32>,
        seq_len: usize,
        pred_len: usize,
    ) -> crate::Result<Self> {
        if values.nrows() != marks.nrows() {
            return Err(crate::ForecastError::Shape(format!(
                "{} value rows but {} mark rows",
                values.nrows(),
                marks.nrows()
            )));
        }

        Ok(Self {
            values,
            marks,
            seq_len,
            pred_len,
        })
    }

    /// Number of windows
    pub fn len(&self) -> usize {
        (self.values.nrows() + 1).saturating_sub(self.seq_len + self.pred_len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn pred_len(&self) -> usize {
        self.pred_len
    }

    pub fn num_nodes(&self) -> usize {
        self.values.ncols()
    }

    pub fn mark_dim(&self) -> usize {
        self.marks.ncols()
    }

    pub fn values(&self) -> ArrayView2<f32> {
        self.values.view()
    }

    /// Window starting at `idx`: input rows `[idx, idx + seq_len)`, target rows
    /// directly after
    pub fn window(&self, idx: usize) -> Window {
        let s_end = idx + self.seq_len;
        let r_end = s_end + self.pred_len;
        let flat = |a: &Array2<f32>, r: Range<usize>| -> Vec<f32> {
            a.slice(s![r, ..]).iter().copied().collect()
        };

        Window {
            x: flat(&self.values, idx..s_end),
            y: flat(&self.values, s_end..r_end),
            x_mark: flat(&self.marks, idx..s_end),
            y_mark: flat(&self.marks, s_end..r_end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(DatasetKind::from_data_path("ETTh1"), DatasetKind::EttHour);
        assert_eq!(DatasetKind::from_data_path("ETTh2"), DatasetKind::EttHour);
        assert_eq!(DatasetKind::from_data_path("ETTm2"), DatasetKind::EttMinute);
        assert_eq!(DatasetKind::from_data_path("PEMS08S"), DatasetKind::Pems);
        assert_eq!(DatasetKind::from_data_path("weather"), DatasetKind::Custom);
        assert_eq!(DatasetKind::Pems.mark_dim(), 1);
        assert_eq!(DatasetKind::EttMinute.mark_dim(), 5);
    }

    #[test]
    fn test_ett_hour_borders() {
        let [train, val, test] = DatasetKind::EttHour.borders(17420, 96);
        assert_eq!(train, 0..8640);
        assert_eq!(val, 8544..11520);
        assert_eq!(test, 11424..14400);
    }

    #[test]
    fn test_custom_borders() {
        let [train, val, test] = DatasetKind::Custom.borders(100, 8);
        assert_eq!(train, 0..70);
        assert_eq!(val, 62..80);
        assert_eq!(test, 72..100);
    }

    #[test]
    fn test_borders_clamp_short_files() {
        let [train, val, test] = DatasetKind::EttHour.borders(1000, 96);
        assert_eq!(train, 0..1000);
        assert!(val.is_empty());
        assert!(test.is_empty());
    }

    #[test]
    fn test_window_layout() -> crate::Result<()> {
        let values = Array2::from_shape_fn((10, 2), |(r, c)| (r * 10 + c) as f32);
        let marks = Array2::from_shape_fn((10, 1), |(r, _)| r as f32);
        let split = SeriesSplit::new(values, marks, 3, 2)?;

        assert_eq!(split.len(), 6);

        let w = split.window(1);
        assert_eq!(w.x, vec![10.0, 11.0, 20.0, 21.0, 30.0, 31.0]);
        assert_eq!(w.y, vec![40.0, 41.0, 50.0, 51.0]);
        assert_eq!(w.x_mark, vec![1.0, 2.0, 3.0]);
        assert_eq!(w.y_mark, vec![4.0, 5.0]);

        // last window ends exactly at the final row
        let last = split.window(split.len() - 1);
        assert_eq!(last.y_mark, vec![8.0, 9.0]);

        Ok(())
    }

    #[test]
    fn test_short_split_has_no_windows() -> crate::Result<()> {
        let split = SeriesSplit::new(Array2::zeros((4, 1)), Array2::zeros((4, 1)), 3, 2)?;
        assert!(split.is_empty());
        Ok(())
    }

    #[test]
    fn test_csv_loading() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("toy.csv");
        let mut f = File::create(&path)?;
        writeln!(f, "date,a,b")?;
        writeln!(f, "2016-07-01 00:00:00,1.0,2.0")?;
        writeln!(f, "2016-07-01 01:00:00,3.0,4.0")?;
        drop(f);

        let raw = RawSeries::from_csv(&path, Frequency::Hourly)?;
        assert_eq!(raw.rows(), 2);
        assert_eq!(raw.num_nodes(), 2);
        assert_eq!(raw.values[[1, 0]], 3.0);
        assert_eq!(raw.marks[[1, 3]], 1.0);

        Ok(())
    }

    #[test]
    fn test_csv_bad_value() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "date,a\n2016-07-01 00:00:00,abc\n")?;

        let err = RawSeries::from_csv(&path, Frequency::Hourly).unwrap_err();
        assert!(matches!(err, crate::ForecastError::Data(_)));

        Ok(())
    }
}
