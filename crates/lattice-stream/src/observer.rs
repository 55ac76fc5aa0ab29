/// Invoked by the owner when the stream becomes readable. Removed on
/// teardown by simply dropping the `Option` that holds it.
pub trait Observer {
    fn on_readable(&mut self);
}

impl<F: FnMut()> Observer for F {
    fn on_readable(&mut self) {
        self()
    }
}
