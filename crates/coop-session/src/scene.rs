/// Loads run scenes on request.
///
/// The session calls [`request_scene_load`](SceneLoader::request_scene_load)
/// after the run seed is stored. The embedding application reports completion
/// back through `SessionCore::on_scene_loaded`.
pub trait SceneLoader: Send {
    fn request_scene_load(&mut self, scene: &str, seed: i32);
}
