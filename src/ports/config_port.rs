//! Configuration access port.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// `get_double`, but `None` when the key is absent or not a number.
    fn get_double_opt(&self, section: &str, key: &str) -> Option<f64> {
        self.get_string(section, key)
            .and_then(|s| s.trim().parse().ok())
    }
}
