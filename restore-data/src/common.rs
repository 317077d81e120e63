pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use approx::abs_diff_eq;
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools as _};
pub use log::{info, warn};
pub use ndarray::{s, Array1, Array2, Array3, ArrayD, Axis};
pub use noisy_float::prelude::*;
pub use once_cell::sync::Lazy;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::{HashMap, HashSet},
    fmt,
    fmt::Debug,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};
