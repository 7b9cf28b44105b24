//! Boot image lookup.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::ServerSpec;

const AVAILABLE: &str = "available";

impl ScalewayBackend {
    pub(in crate::scaleway) async fn resolve_image_id(
        &self,
        spec: &ServerSpec,
    ) -> Result<String, ScalewayBackendError> {
        let project_images = || async move {
            if spec.project_id.is_empty() {
                return Ok(Vec::new());
            }
            let unscoped = ScalewayListInstanceImagesBuilder::new(self.api.clone(), &spec.zone)
                .public(true)
                .name(&spec.image_label)
                .arch(&spec.architecture)
                .project(&spec.project_id);
            let scoped = match &spec.organisation_id {
                Some(org) => unscoped.organization(org),
                None => unscoped,
            };
            scoped.run_async().await.map_err(ScalewayBackendError::from)
        };
        let public_images = || async move {
            ScalewayListInstanceImagesBuilder::new(self.api.clone(), &spec.zone)
                .public(true)
                .name(&spec.image_label)
                .arch(&spec.architecture)
                .run_async()
                .await
                .map_err(ScalewayBackendError::from)
        };
        self.resolve_image_id_with(spec, project_images, public_images)
            .await
    }

    /// Picks an image from the project's listing, or from the public catalogue
    /// when the project has nothing under the label.
    pub(in crate::scaleway) async fn resolve_image_id_with<Project, Public, ProjectFut, PublicFut>(
        &self,
        spec: &ServerSpec,
        project: Project,
        public: Public,
    ) -> Result<String, ScalewayBackendError>
    where
        Project: FnOnce() -> ProjectFut,
        Public: FnOnce() -> PublicFut,
        ProjectFut: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
        PublicFut: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
    {
        let mut images = project().await?;
        if images.is_empty() {
            images = public().await?;
        }
        Self::select_image_id(Self::filter_images(images, spec), spec)
    }

    /// Returns the most recently created candidate.
    pub(in crate::scaleway) fn select_image_id(
        candidates: Vec<ScalewayImage>,
        spec: &ServerSpec,
    ) -> Result<String, ScalewayBackendError> {
        candidates
            .into_iter()
            .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
            .map(|image| image.id)
            .ok_or_else(|| ScalewayBackendError::ImageNotFound {
                label: spec.image_label.clone(),
                arch: spec.architecture.clone(),
                zone: spec.zone.clone(),
            })
    }

    pub(in crate::scaleway) fn filter_images(
        images: Vec<ScalewayImage>,
        spec: &ServerSpec,
    ) -> Vec<ScalewayImage> {
        images
            .into_iter()
            .filter(|image| image.arch == spec.architecture && image.state == AVAILABLE)
            .collect()
    }
}
