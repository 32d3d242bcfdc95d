fn main() -> color_eyre::Result<()> {
    haven_lib::run()
}
