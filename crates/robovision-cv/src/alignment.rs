//! Two-pattern alignment
//!
//! Both patterns are located in the same image; the best center of each
//! (`c1` from the primary pattern, `c2` from the secondary) feeds
//! [`AlignmentGeometry`].

use crate::Result;
use crate::matching::{MatchOutcome, Matcher};
use crate::traits::MatchEngine;
use crate::utils::ImageUtils;
use anyhow::{Context, bail};
use opencv::core::Mat;
use robovision_core::config::MatchingConfig;
use robovision_core::frame::Frame;
use robovision_core::geometry::AlignmentGeometry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Everything one inspection found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub primary: MatchOutcome,
    pub secondary: MatchOutcome,
    /// Present when both patterns were found
    pub geometry: Option<AlignmentGeometry>,
}

impl AlignmentReport {
    pub fn from_outcomes(primary: MatchOutcome, secondary: MatchOutcome) -> Self {
        let geometry = match (primary.best_center(), secondary.best_center()) {
            (Some(c1), Some(c2)) => Some(AlignmentGeometry::from_centers(c1, c2)),
            _ => None,
        };
        Self {
            primary,
            secondary,
            geometry,
        }
    }

    /// Signed alignment angle, when it could be computed
    pub fn angle_deg(&self) -> Option<f64> {
        self.geometry.and_then(|g| g.angle_deg)
    }

    /// One-line operator summary
    pub fn summary(&self) -> String {
        match &self.geometry {
            Some(geometry) => format!(
                "A: {} match(es), B: {} match(es), {}",
                self.primary.count,
                self.secondary.count,
                geometry.label()
            ),
            None => format!(
                "A: {} match(es), B: {} match(es), alignment unavailable",
                self.primary.count, self.secondary.count
            ),
        }
    }
}

pub struct AlignmentInspector {
    primary: Box<dyn MatchEngine>,
    secondary: Box<dyn MatchEngine>,
}

impl AlignmentInspector {
    pub fn new(primary: Box<dyn MatchEngine>, secondary: Box<dyn MatchEngine>) -> Self {
        Self { primary, secondary }
    }

    /// Build both matchers from the configured pattern files.
    pub fn from_config(config: &MatchingConfig) -> Result<Self> {
        let (Some(pattern_a), Some(pattern_b)) = (&config.pattern_a, &config.pattern_b) else {
            bail!("Alignment needs both pattern_a and pattern_b");
        };

        let primary = Matcher::from_file(pattern_a, config.params_a)
            .context("Failed to prepare pattern A")?;
        let secondary = Matcher::from_file(pattern_b, config.params_b)
            .context("Failed to prepare pattern B")?;
        info!("alignment patterns loaded: {:?}, {:?}", pattern_a, pattern_b);

        Ok(Self::new(Box::new(primary), Box::new(secondary)))
    }

    /// Locate both patterns in a BGR or grayscale image.
    pub fn inspect(&self, image: &Mat) -> Result<AlignmentReport> {
        let (primary, secondary) = self.run_both(image);
        let report = AlignmentReport::from_outcomes(
            primary.context("Pattern A matching failed")?,
            secondary.context("Pattern B matching failed")?,
        );
        debug!("{}", report.summary());
        Ok(report)
    }

    pub fn inspect_frame(&self, frame: &Frame) -> Result<AlignmentReport> {
        let image = ImageUtils::frame_to_mat(frame)?;
        self.inspect(&image)
    }

    #[cfg(feature = "parallel")]
    fn run_both(&self, image: &Mat) -> (Result<MatchOutcome>, Result<MatchOutcome>) {
        rayon::join(|| self.primary.match_image(image), || self.secondary.match_image(image))
    }

    #[cfg(not(feature = "parallel"))]
    fn run_both(&self, image: &Mat) -> (Result<MatchOutcome>, Result<MatchOutcome>) {
        (self.primary.match_image(image), self.secondary.match_image(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::{MatchResult, MatchSet};
    use robovision_core::geometry::Point2;

    /// Engine that reports fixed centers regardless of the image
    struct Fixed(Vec<Point2>);

    impl MatchEngine for Fixed {
        fn match_image(&self, _image: &Mat) -> Result<MatchOutcome> {
            let matches = self
                .0
                .iter()
                .map(|&c| MatchResult::rotated(0.9, c, 10.0, 10.0, 0.0))
                .collect::<MatchSet>();
            Ok(MatchOutcome::from_matches(matches))
        }
    }

    struct Failing;

    impl MatchEngine for Failing {
        fn match_image(&self, _image: &Mat) -> Result<MatchOutcome> {
            bail!("engine failure")
        }
    }

    #[test]
    fn test_geometry_from_best_centers() -> Result<()> {
        let inspector = AlignmentInspector::new(
            Box::new(Fixed(vec![Point2::new(10.0, 10.0)])),
            Box::new(Fixed(vec![Point2::new(20.0, 30.0)])),
        );

        let report = inspector.inspect(&Mat::default())?;
        let geometry = report.geometry.context("geometry missing")?;
        assert_eq!(geometry.c3, Point2::new(10.0, 30.0));
        let angle = report.angle_deg().context("angle missing")?;
        let expected = (10.0f64 * 20.0 - 20.0 * 0.0).atan2(10.0 * 0.0 + 20.0 * 20.0).to_degrees();
        assert!((angle - expected).abs() < 1e-9);
        assert!(report.summary().contains("angle:"));
        Ok(())
    }

    #[test]
    fn test_missing_pattern_leaves_geometry_empty() -> Result<()> {
        let inspector = AlignmentInspector::new(
            Box::new(Fixed(vec![Point2::new(10.0, 10.0)])),
            Box::new(Fixed(Vec::new())),
        );

        let report = inspector.inspect(&Mat::default())?;
        assert!(report.geometry.is_none());
        assert_eq!(report.secondary.count, 0);
        assert!(report.summary().contains("unavailable"));
        Ok(())
    }

    #[test]
    fn test_engine_failure_propagates() {
        let inspector = AlignmentInspector::new(Box::new(Fixed(Vec::new())), Box::new(Failing));
        assert!(inspector.inspect(&Mat::default()).is_err());
    }

    #[test]
    fn test_report_serializes() -> Result<()> {
        let report =
            AlignmentReport::from_outcomes(MatchOutcome::default(), MatchOutcome::default());
        let json = serde_json::to_string(&report)?;
        assert!(json.contains("\"geometry\":null"));
        Ok(())
    }

    #[test]
    fn test_config_requires_both_patterns() {
        let config = MatchingConfig::default();
        assert!(AlignmentInspector::from_config(&config).is_err());
    }
}
