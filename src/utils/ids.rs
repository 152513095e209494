// Ids are handed out monotonically and never reused; stale ids held in
// cross-episode tables simply stop matching anything.
macro_rules! id_gen {
    ($func_name:ident, $id_name:ident) => {
        static $id_name: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

        pub(crate) fn $func_name() -> usize {
            $id_name.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        }
    };
}

pub(crate) use id_gen;
