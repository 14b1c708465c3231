use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manually determined correction mapping annotation space into the native
/// voxel grid. `fixed_slice` supplies the axis the 2-D annotation lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationOffset {
    pub lateral: i64,
    pub fixed_slice: i64,
    pub depth: i64,
}

impl CalibrationOffset {
    pub fn new(lateral: i64, fixed_slice: i64, depth: i64) -> Self {
        Self {
            lateral,
            fixed_slice,
            depth,
        }
    }
}

/// Everything the steps need to know about one subject, resolved once from
/// configuration at run start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectDescriptor {
    pub id: String,
    pub annotation_path: PathBuf,
    pub native_volume_path: PathBuf,
    pub calibration: Option<CalibrationOffset>,
    /// Set only when a `special_annotation_<id>` override applied.
    pub annotation_suffix: Option<String>,
    pub slice_marker: String,
    pub stain_marker: String,
    pub output_dir: PathBuf,
}

impl SubjectDescriptor {
    /// `<output_dir>/<id><suffix>`, the per-step directory layout.
    pub fn step_dir(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}{}", self.id, suffix))
    }

    fn artifact(&self, suffix: &str, name: &str) -> PathBuf {
        self.step_dir(suffix).join(format!("{}{}", self.id, name))
    }

    pub fn upsampled_volume(&self) -> PathBuf {
        self.artifact("_upsampled", "_001_up_re.nii.gz")
    }

    pub fn slices_dir(&self) -> PathBuf {
        self.step_dir("_slices")
    }

    pub fn tile_table(&self) -> PathBuf {
        self.artifact("_coordinates", "_tile_proc.csv")
    }

    pub fn transformed_table(&self) -> PathBuf {
        self.artifact("_transformation", "_transformed_coordinates.csv")
    }

    pub fn mask_block(&self) -> PathBuf {
        let name = format!("_QNP_{}_mask_block.nii.gz", self.stain_marker);
        self.artifact("_transformation", &name)
    }

    pub fn smoothed_mask(&self) -> PathBuf {
        let name = format!("_QNP_{}_smoothed.nii.gz", self.stain_marker);
        self.artifact("_kernel", &name)
    }

    /// Prefix handed to the registration tool; it appends its own suffixes.
    pub fn registration_prefix(&self) -> PathBuf {
        self.artifact("_mni_registration", "_")
    }

    pub fn registration_affine(&self) -> PathBuf {
        self.artifact("_mni_registration", "_0GenericAffine.mat")
    }

    pub fn registration_warp(&self) -> PathBuf {
        self.artifact("_mni_registration", "_1Warp.nii.gz")
    }

    pub fn mni_mask(&self) -> PathBuf {
        self.artifact("_mni_registration", "_QNP_mask_ToMNI.nii.gz")
    }

    pub fn is_under_output(&self, path: &Path) -> bool {
        path.starts_with(&self.output_dir)
    }
}

#[cfg(test)]
pub(crate) fn fixture(id: &str, root: &Path) -> SubjectDescriptor {
    SubjectDescriptor {
        id: id.to_string(),
        annotation_path: root.join(format!("annotations/{}-A1-AT8.annotations", id)),
        native_volume_path: root.join(format!("volumes/{}X/001.mgz", id)),
        calibration: Some(CalibrationOffset::new(0, 2, 0)),
        annotation_suffix: None,
        slice_marker: "A1".to_string(),
        stain_marker: "AT8".to_string(),
        output_dir: root.join("output").join(id),
    }
}
