use objstress::entry;
use objstress::error::AppResult;

fn main() -> AppResult<()> {
    entry::run()
}
